//! The bootstrap's view of its external collaborators.
//!
//! Service registration, the elevation prompt, direct process creation and
//! the caller's own security context are all owned by other subsystems (or
//! the operating system). The bootstrap only ever touches them through this
//! trait, which is also where tests substitute fakes.

use opsvc_client::ConnectOptions;
use opsvc_client::Session;
use opsvc_protocol::RunAsParameters;

use crate::error::Result;

pub trait BrokerEnvironment {
    /// Whether the calling process already runs elevated.
    fn is_elevated(&self) -> bool;

    /// Terminal session of the calling process.
    fn current_session_id(&self) -> u32;

    /// Registers the transient broker service under `service_name`
    /// (demand-start, errors ignored), starts it once, and deregisters it
    /// immediately. The broker keeps running and self-terminates after an
    /// idle timeout.
    fn provision_broker(&self, service_name: &str) -> Result<()>;

    /// Asks the user to approve starting an elevated helper instance and
    /// returns the helper's channel name. A declined prompt is
    /// [`ElevationCancelled`](crate::ElevationError::Cancelled).
    fn prompt_elevation(&self) -> Result<String>;

    /// Performs the run-as operation in-process, without any broker.
    fn execute_direct(&self, parameters: &RunAsParameters) -> Result<()>;

    /// Opens a session on the named broker channel. One attempt; the
    /// bootstrap owns the retry policy.
    fn connect(&self, channel_name: &str) -> opsvc_client::Result<Session> {
        Session::connect(channel_name, ConnectOptions::default())
    }
}
