/*!
# Signage DevKit

Development helpers for the signage agent:
- In-memory stub of the signage cloud API, served over real HTTP
- Fixtures for manifests and content units

Lets the agent (or its HTTP client) be exercised end to end without a backend.
*/

pub mod fixtures;
pub mod stub_cloud;

pub use stub_cloud::{RunningStub, StubCloud};
