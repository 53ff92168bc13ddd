/*!
# netfleet devkit

Stubs and helpers for testing root/client scenarios in one process:
- loopback transport between a client and an in-process root
- scripted liveness probe and mock device protocol
- alert recorder and device fixtures
- a cluster harness wiring it all together
*/

pub mod fixtures;
pub mod probe_stub;
pub mod protocol_stub;
pub mod test_utils;
pub mod transport_stub;

pub use fixtures::{complete_device, partial_device, RecordingNotifier};
pub use probe_stub::ScriptedProbe;
pub use protocol_stub::MockProtocol;
pub use test_utils::{ClientNode, ClusterHarness};
pub use transport_stub::{Call, LoopbackTransport};
