//! Typed call builders, one per broker operation.
//!
//! Each builder packs its arguments through the marshaler, performs the
//! synchronous call, decodes the typed reply, and releases every arena
//! allocation it made in reverse order of allocation — on error paths too.
//! Builders carrying credentials scrub the packed password bytes before the
//! allocation is released, whatever the call's outcome. The `*_packed`
//! halves run with the allocation ledger open; the public halves own the
//! release.

use std::os::fd::BorrowedFd;

use opsvc_protocol::Envelope;
use opsvc_protocol::RelativeRef;
use opsvc_protocol::ops::PLUGIN_DATA_MAX;
use opsvc_protocol::ops::ProcessCommand;
use opsvc_protocol::ops::ReplyPayload;
use opsvc_protocol::ops::RequestPayload;
use opsvc_protocol::ops::RunAsPayload;
use opsvc_protocol::ops::ServiceCommand;
use opsvc_protocol::ops::ServiceConfigPayload;
use opsvc_protocol::ops::ThreadCommand;
use opsvc_protocol::run_as::RunAsParameters;
use opsvc_protocol::run_as::Secret;
use opsvc_protocol::service_config::ServiceConfig2;
use opsvc_protocol::status;
use opsvc_protocol::wstr;
use tracing::trace;

use crate::error::ClientError;
use crate::error::Result;
use crate::error::status_to_result;
use crate::marshal::ArgPack;
use crate::session::Session;

/// Arguments shared by `create_service` and `change_service_config`.
#[derive(Clone, Debug, Default)]
pub struct ServiceConfigParameters {
    pub service_name: String,
    pub display_name: Option<String>,
    pub service_type: u32,
    pub start_type: u32,
    pub error_control: u32,
    pub binary_path_name: Option<String>,
    pub load_order_group: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub service_start_name: Option<String>,
    pub password: Option<Secret>,
}

/// One row of the TCP connection table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpEntry {
    pub state: u32,
    pub local_address: u32,
    pub local_port: u32,
    pub remote_address: u32,
    pub remote_port: u32,
}

impl Session {
    fn transact(&mut self, payload: &RequestPayload) -> Result<Envelope> {
        let mut envelope = Envelope::request(payload)?;
        trace!(api = ?envelope.api_number(), "broker call");
        self.call(&mut envelope)?;
        Ok(envelope)
    }

    fn transact_checked(&mut self, payload: &RequestPayload) -> Result<Envelope> {
        let envelope = self.transact(payload)?;
        status_to_result(envelope.status())?;
        Ok(envelope)
    }

    /// Relays an opaque request to a broker-side plugin identified by
    /// `api_id`. Returns the number of reply bytes copied into `out_data`.
    pub fn call_plugin(
        &mut self,
        api_id: &str,
        in_data: &[u8],
        out_data: &mut [u8],
    ) -> Result<usize> {
        if in_data.len() > PLUGIN_DATA_MAX {
            return Err(ClientError::Protocol(
                "plugin payload exceeds the inline buffer".to_string(),
            ));
        }

        let mut args = ArgPack::new();
        let outcome = self.plugin_packed(&mut args, api_id, in_data);
        args.release(self.arena_mut());

        let envelope = outcome?;
        // The inline reply buffer is copied out whatever the status says,
        // mirroring the operation's contract.
        let copied = match envelope.decode_reply()? {
            ReplyPayload::Plugin { data } => {
                let n = out_data.len().min(data.len());
                out_data[..n].copy_from_slice(&data[..n]);
                n
            }
            _ => 0,
        };
        status_to_result(envelope.status())?;
        Ok(copied)
    }

    fn plugin_packed(
        &mut self,
        args: &mut ArgPack,
        api_id: &str,
        in_data: &[u8],
    ) -> Result<Envelope> {
        let api_id = args.push_string(self.arena_mut(), api_id)?;
        self.transact(&RequestPayload::Plugin {
            api_id,
            data: in_data.to_vec(),
        })
    }

    /// Asks an elevated broker to provision and drive the transient run-as
    /// service described by `parameters.service_name`.
    pub fn execute_run_as_command(&mut self, parameters: &RunAsParameters) -> Result<()> {
        self.call_run_as(false, parameters)
    }

    /// Asks the transient run-as service itself to perform the execution.
    pub fn invoke_run_as_service(&mut self, parameters: &RunAsParameters) -> Result<()> {
        self.call_run_as(true, parameters)
    }

    fn call_run_as(&mut self, invoke: bool, parameters: &RunAsParameters) -> Result<()> {
        let mut args = ArgPack::new();
        let outcome = self.run_as_packed(&mut args, invoke, parameters);
        // Scrubs the packed password and frees in reverse order, success or
        // failure alike.
        args.release(self.arena_mut());
        outcome.map(|_| ())
    }

    fn run_as_packed(
        &mut self,
        args: &mut ArgPack,
        invoke: bool,
        parameters: &RunAsParameters,
    ) -> Result<Envelope> {
        let user_name = args.push_opt_string(self.arena_mut(), parameters.user_name.as_deref())?;
        let password = args.push_opt_secret(self.arena_mut(), parameters.password.as_ref())?;
        let current_directory =
            args.push_opt_string(self.arena_mut(), parameters.current_directory.as_deref())?;
        let command_line =
            args.push_string(self.arena_mut(), parameters.command_line.as_str())?;
        let file_name = args.push_opt_string(self.arena_mut(), parameters.file_name.as_deref())?;
        let desktop_name =
            args.push_opt_string(self.arena_mut(), parameters.desktop_name.as_deref())?;
        let service_name =
            args.push_opt_string(self.arena_mut(), parameters.service_name.as_deref())?;

        let payload = RunAsPayload {
            process_id: parameters.process_id.unwrap_or(0),
            logon_type: parameters.logon_type as u32,
            session_id: parameters.session_id,
            use_linked_token: parameters.use_linked_token,
            create_suspended: parameters.create_suspended,
            user_name,
            password,
            current_directory,
            command_line,
            file_name,
            desktop_name,
            service_name,
        };
        let payload = if invoke {
            RequestPayload::InvokeRunAsService(payload)
        } else {
            RequestPayload::ExecuteRunAsCommand(payload)
        };
        self.transact_checked(&payload)
    }

    /// Unloads a driver by base address, image name, or both.
    pub fn unload_driver(&mut self, base_address: Option<u64>, name: Option<&str>) -> Result<()> {
        let mut args = ArgPack::new();
        let outcome = self.unload_driver_packed(&mut args, base_address, name);
        args.release(self.arena_mut());
        outcome.map(|_| ())
    }

    fn unload_driver_packed(
        &mut self,
        args: &mut ArgPack,
        base_address: Option<u64>,
        name: Option<&str>,
    ) -> Result<Envelope> {
        let name = args.push_opt_string(self.arena_mut(), name)?;
        self.transact_checked(&RequestPayload::UnloadDriver {
            base_address: base_address.unwrap_or(0),
            name,
        })
    }

    pub fn control_process(
        &mut self,
        process_id: Option<u32>,
        command: ProcessCommand,
        argument: u32,
    ) -> Result<()> {
        self.transact_checked(&RequestPayload::ControlProcess {
            process_id: process_id.unwrap_or(0),
            command,
            argument,
        })
        .map(|_| ())
    }

    pub fn control_thread(
        &mut self,
        thread_id: u32,
        command: ThreadCommand,
        argument: u32,
    ) -> Result<()> {
        self.transact_checked(&RequestPayload::ControlThread {
            thread_id,
            command,
            argument,
        })
        .map(|_| ())
    }

    pub fn control_service(&mut self, service_name: &str, command: ServiceCommand) -> Result<()> {
        let mut args = ArgPack::new();
        let outcome = self.control_service_packed(&mut args, service_name, command);
        args.release(self.arena_mut());
        outcome.map(|_| ())
    }

    fn control_service_packed(
        &mut self,
        args: &mut ArgPack,
        service_name: &str,
        command: ServiceCommand,
    ) -> Result<Envelope> {
        let service_name = args.push_string(self.arena_mut(), service_name)?;
        self.transact_checked(&RequestPayload::ControlService {
            service_name,
            command,
        })
    }

    /// Creates a service. When `request_tag_id` is set the broker assigns a
    /// load-order tag and the call returns it.
    pub fn create_service(
        &mut self,
        config: &ServiceConfigParameters,
        request_tag_id: bool,
    ) -> Result<Option<u32>> {
        self.call_service_config(true, config, request_tag_id)
    }

    /// Rewrites the first-level configuration of an existing service.
    pub fn change_service_config(
        &mut self,
        config: &ServiceConfigParameters,
        request_tag_id: bool,
    ) -> Result<Option<u32>> {
        self.call_service_config(false, config, request_tag_id)
    }

    fn call_service_config(
        &mut self,
        create: bool,
        config: &ServiceConfigParameters,
        request_tag_id: bool,
    ) -> Result<Option<u32>> {
        let mut args = ArgPack::new();
        let outcome = self.service_config_packed(&mut args, create, config, request_tag_id);
        args.release(self.arena_mut());

        let envelope = outcome?;
        if !request_tag_id {
            return Ok(None);
        }
        match envelope.decode_reply()? {
            ReplyPayload::CreateService { tag_id }
            | ReplyPayload::ChangeServiceConfig { tag_id } => Ok(Some(tag_id)),
            _ => Err(ClientError::Protocol(
                "missing tag id in service config reply".to_string(),
            )),
        }
    }

    fn service_config_packed(
        &mut self,
        args: &mut ArgPack,
        create: bool,
        config: &ServiceConfigParameters,
        request_tag_id: bool,
    ) -> Result<Envelope> {
        let service_name = args.push_string(self.arena_mut(), config.service_name.as_str())?;
        let display_name =
            args.push_opt_string(self.arena_mut(), config.display_name.as_deref())?;
        let binary_path_name =
            args.push_opt_string(self.arena_mut(), config.binary_path_name.as_deref())?;
        let load_order_group =
            args.push_opt_string(self.arena_mut(), config.load_order_group.as_deref())?;
        let dependencies = match &config.dependencies {
            Some(parts) => args.push_multi_string(self.arena_mut(), parts)?,
            None => RelativeRef::NULL,
        };
        let service_start_name =
            args.push_opt_string(self.arena_mut(), config.service_start_name.as_deref())?;
        let password = args.push_opt_secret(self.arena_mut(), config.password.as_ref())?;

        let payload = ServiceConfigPayload {
            service_type: config.service_type,
            start_type: config.start_type,
            error_control: config.error_control,
            tag_id_specified: request_tag_id,
            service_name,
            display_name,
            binary_path_name,
            load_order_group,
            dependencies,
            service_start_name,
            password,
        };
        let payload = if create {
            RequestPayload::CreateService(payload)
        } else {
            RequestPayload::ChangeServiceConfig(payload)
        };
        self.transact_checked(&payload)
    }

    /// Rewrites one second-level configuration item, sub-dispatched by info
    /// level. Nested payloads are flattened before entering the arena.
    pub fn change_service_config2(
        &mut self,
        service_name: &str,
        config: &ServiceConfig2,
    ) -> Result<()> {
        let blob = config.pack()?;
        let mut args = ArgPack::new();
        let outcome = self.service_config2_packed(&mut args, service_name, config, &blob);
        args.release(self.arena_mut());
        outcome.map(|_| ())
    }

    fn service_config2_packed(
        &mut self,
        args: &mut ArgPack,
        service_name: &str,
        config: &ServiceConfig2,
        blob: &[u8],
    ) -> Result<Envelope> {
        let service_name = args.push_string(self.arena_mut(), service_name)?;
        let info = args.push_bytes(self.arena_mut(), blob)?;
        self.transact_checked(&RequestPayload::ChangeServiceConfig2 {
            info_level: config.info_level(),
            service_name,
            info,
        })
    }

    /// Replaces (part of) a service's security descriptor. The descriptor is
    /// carried as opaque self-relative bytes.
    pub fn set_service_security(
        &mut self,
        service_name: &str,
        security_information: u32,
        security_descriptor: &[u8],
    ) -> Result<()> {
        let mut args = ArgPack::new();
        let outcome = self.set_service_security_packed(
            &mut args,
            service_name,
            security_information,
            security_descriptor,
        );
        args.release(self.arena_mut());
        outcome.map(|_| ())
    }

    fn set_service_security_packed(
        &mut self,
        args: &mut ArgPack,
        service_name: &str,
        security_information: u32,
        security_descriptor: &[u8],
    ) -> Result<Envelope> {
        let service_name = args.push_string(self.arena_mut(), service_name)?;
        let security_descriptor = args.push_bytes(self.arena_mut(), security_descriptor)?;
        self.transact_checked(&RequestPayload::SetServiceSecurity {
            security_information,
            service_name,
            security_descriptor,
        })
    }

    pub fn set_tcp_entry(&mut self, entry: &TcpEntry) -> Result<()> {
        self.transact_checked(&RequestPayload::SetTcpEntry {
            state: entry.state,
            local_address: entry.local_address,
            local_port: entry.local_port,
            remote_address: entry.remote_address,
            remote_port: entry.remote_port,
        })
        .map(|_| ())
    }

    /// Grants `user_right` to the account identified by the opaque
    /// security-identifier bytes.
    pub fn add_account_right(&mut self, account_sid: &[u8], user_right: &str) -> Result<()> {
        let mut args = ArgPack::new();
        let outcome = self.add_account_right_packed(&mut args, account_sid, user_right);
        args.release(self.arena_mut());
        outcome.map(|_| ())
    }

    fn add_account_right_packed(
        &mut self,
        args: &mut ArgPack,
        account_sid: &[u8],
        user_right: &str,
    ) -> Result<Envelope> {
        let account_sid = args.push_bytes(self.arena_mut(), account_sid)?;
        let user_right = args.push_string(self.arena_mut(), user_right)?;
        self.transact_checked(&RequestPayload::AddAccountRight {
            account_sid,
            user_right,
        })
    }

    pub fn issue_memory_list_command(&mut self, command: u32) -> Result<()> {
        self.transact_checked(&RequestPayload::IssueMemoryListCommand { command })
            .map(|_| ())
    }

    /// Posts a window message from the broker's context without waiting.
    pub fn post_message(
        &mut self,
        window: u64,
        message: u32,
        wparam: u64,
        lparam: u64,
    ) -> Result<()> {
        self.transact_checked(&RequestPayload::PostMessage {
            window,
            message,
            wparam,
            lparam,
        })
        .map(|_| ())
    }

    /// Sends a window message from the broker's context and waits for the
    /// target to process it.
    pub fn send_message(
        &mut self,
        window: u64,
        message: u32,
        wparam: u64,
        lparam: u64,
    ) -> Result<()> {
        self.transact_checked(&RequestPayload::SendMessage {
            window,
            message,
            wparam,
            lparam,
        })
        .map(|_| ())
    }

    /// Starts a program bypassing any debugger registered for its image.
    pub fn create_process_ignoring_debugger(
        &mut self,
        file_name: &str,
        command_line: Option<&str>,
    ) -> Result<()> {
        let mut args = ArgPack::new();
        let outcome = self.create_process_packed(&mut args, file_name, command_line);
        args.release(self.arena_mut());
        outcome.map(|_| ())
    }

    fn create_process_packed(
        &mut self,
        args: &mut ArgPack,
        file_name: &str,
        command_line: Option<&str>,
    ) -> Result<Envelope> {
        let file_name = args.push_string(self.arena_mut(), file_name)?;
        let command_line = args.push_opt_string(self.arena_mut(), command_line)?;
        self.transact_checked(&RequestPayload::CreateProcessIgnoringDebugger {
            file_name,
            command_line,
        })
    }

    /// Writes a minidump of `process_id`. The client usually has more
    /// access than the broker here, so the process and output-file
    /// descriptors are transferred to the broker with the request.
    pub fn write_mini_dump_process(
        &mut self,
        process: BorrowedFd<'_>,
        process_id: u32,
        file: BorrowedFd<'_>,
        dump_type: u32,
    ) -> Result<()> {
        let payload = RequestPayload::WriteMiniDumpProcess {
            process_fd_index: 0,
            file_fd_index: 1,
            process_id,
            dump_type,
        };
        let mut envelope = Envelope::request(&payload)?;
        self.call_with_fds(&mut envelope, &[process, file])?;
        status_to_result(envelope.status())
    }

    /// Fetches the heap summary of a process as text. The first attempt
    /// speculates a small buffer; if the broker reports it was too small the
    /// builder re-allocates at the reported size and retries exactly once.
    pub fn query_process_heap_information(&mut self, process_id: u32) -> Result<String> {
        const SPECULATIVE_SIZE: usize = 4096;

        let mut data = self.arena_mut().allocate(SPECULATIVE_SIZE)?;
        let mut envelope = match self.transact(&RequestPayload::QueryProcessHeapInformation {
            process_id,
            data,
        }) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.arena_mut().free(data);
                return Err(err);
            }
        };

        if envelope.status() == status::BUFFER_TOO_SMALL {
            let required = match envelope.decode_reply() {
                Ok(ReplyPayload::QueryProcessHeapInformation { data_length }) => data_length,
                _ => 0,
            };
            self.arena_mut().free(data);
            if required == 0 {
                return Err(ClientError::Protocol(
                    "broker reported no required buffer size".to_string(),
                ));
            }

            data = self.arena_mut().allocate(required as usize)?;
            envelope = match self.transact(&RequestPayload::QueryProcessHeapInformation {
                process_id,
                data,
            }) {
                Ok(envelope) => envelope,
                Err(err) => {
                    self.arena_mut().free(data);
                    return Err(err);
                }
            };
        }

        let outcome = self.decode_heap_reply(&envelope, data);
        self.arena_mut().free(data);
        outcome
    }

    fn decode_heap_reply(&self, envelope: &Envelope, data: RelativeRef) -> Result<String> {
        status_to_result(envelope.status())?;
        let ReplyPayload::QueryProcessHeapInformation { data_length } = envelope.decode_reply()?
        else {
            return Err(ClientError::Protocol(
                "missing length in heap information reply".to_string(),
            ));
        };
        if data_length > data.length {
            return Err(ClientError::Protocol(
                "heap information longer than its buffer".to_string(),
            ));
        }
        let raw = self
            .arena()
            .read(RelativeRef::new(data.offset, data_length))?;
        Ok(wstr::decode(&raw)?)
    }
}
