//! Per-operation payload layouts.
//!
//! The payload area of the envelope holds one of these, selected by the
//! header's operation selector. Requests and replies are tagged enums
//! decoded by exhaustive matching; the fixed little-endian layouts below
//! are the wire contract, so field order here is load-bearing.

use crate::WireError;
use crate::codec::Reader;
use crate::codec::Writer;
use crate::envelope::ApiNumber;
use crate::envelope::PAYLOAD_SIZE;
use crate::relative::RelativeRef;

/// Inline plugin payload bound, each direction.
pub const PLUGIN_DATA_MAX: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ProcessCommand {
    Terminate = 1,
    Suspend = 2,
    Resume = 3,
    Priority = 4,
    IoPriority = 5,
    PagePriority = 6,
    PriorityBoost = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ThreadCommand {
    Terminate = 1,
    Suspend = 2,
    Resume = 3,
    Priority = 4,
    IoPriority = 5,
    PagePriority = 6,
    PriorityBoost = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ServiceCommand {
    Start = 1,
    Continue = 2,
    Pause = 3,
    Stop = 4,
    Delete = 5,
}

fn command_from_u32<T: Copy>(table: &[(u32, T)], raw: u32) -> Result<T, WireError> {
    table
        .iter()
        .find(|(value, _)| *value == raw)
        .map(|(_, cmd)| *cmd)
        .ok_or(WireError::Malformed("unknown control command"))
}

impl ProcessCommand {
    pub fn from_u32(raw: u32) -> Result<Self, WireError> {
        use ProcessCommand::*;
        command_from_u32(
            &[
                (1, Terminate),
                (2, Suspend),
                (3, Resume),
                (4, Priority),
                (5, IoPriority),
                (6, PagePriority),
                (7, PriorityBoost),
            ],
            raw,
        )
    }
}

impl ThreadCommand {
    pub fn from_u32(raw: u32) -> Result<Self, WireError> {
        use ThreadCommand::*;
        command_from_u32(
            &[
                (1, Terminate),
                (2, Suspend),
                (3, Resume),
                (4, Priority),
                (5, IoPriority),
                (6, PagePriority),
                (7, PriorityBoost),
            ],
            raw,
        )
    }
}

impl ServiceCommand {
    pub fn from_u32(raw: u32) -> Result<Self, WireError> {
        use ServiceCommand::*;
        command_from_u32(
            &[(1, Start), (2, Continue), (3, Pause), (4, Stop), (5, Delete)],
            raw,
        )
    }
}

/// Fixed fields shared by `ExecuteRunAsCommand` and `InvokeRunAsService`.
///
/// All strings are optional; an absent string is a null reference, which the
/// target operation itself treats as "parameter not supplied".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunAsPayload {
    pub process_id: u32,
    pub logon_type: u32,
    pub session_id: u32,
    pub use_linked_token: bool,
    pub create_suspended: bool,
    pub user_name: RelativeRef,
    pub password: RelativeRef,
    pub current_directory: RelativeRef,
    pub command_line: RelativeRef,
    pub file_name: RelativeRef,
    pub desktop_name: RelativeRef,
    pub service_name: RelativeRef,
}

impl RunAsPayload {
    fn encode(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put_u32(self.process_id)?;
        w.put_u32(self.logon_type)?;
        w.put_u32(self.session_id)?;
        w.put_u8(self.use_linked_token as u8)?;
        w.put_u8(self.create_suspended as u8)?;
        w.put_u8(0)?;
        w.put_u8(0)?;
        for r in [
            self.user_name,
            self.password,
            self.current_directory,
            self.command_line,
            self.file_name,
            self.desktop_name,
            self.service_name,
        ] {
            w.put_bytes(&r.encode())?;
        }
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let process_id = r.get_u32()?;
        let logon_type = r.get_u32()?;
        let session_id = r.get_u32()?;
        let use_linked_token = r.get_u8()? != 0;
        let create_suspended = r.get_u8()? != 0;
        r.get_u8()?;
        r.get_u8()?;
        let mut refs = [RelativeRef::NULL; 7];
        for slot in &mut refs {
            *slot = RelativeRef::decode(r.get_bytes(8)?)?;
        }
        Ok(Self {
            process_id,
            logon_type,
            session_id,
            use_linked_token,
            create_suspended,
            user_name: refs[0],
            password: refs[1],
            current_directory: refs[2],
            command_line: refs[3],
            file_name: refs[4],
            desktop_name: refs[5],
            service_name: refs[6],
        })
    }
}

/// Fixed fields shared by `CreateService` and `ChangeServiceConfig`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceConfigPayload {
    pub service_type: u32,
    pub start_type: u32,
    pub error_control: u32,
    pub tag_id_specified: bool,
    pub service_name: RelativeRef,
    pub display_name: RelativeRef,
    pub binary_path_name: RelativeRef,
    pub load_order_group: RelativeRef,
    pub dependencies: RelativeRef,
    pub service_start_name: RelativeRef,
    pub password: RelativeRef,
}

impl ServiceConfigPayload {
    fn encode(&self, w: &mut Writer<'_>) -> Result<(), WireError> {
        w.put_u32(self.service_type)?;
        w.put_u32(self.start_type)?;
        w.put_u32(self.error_control)?;
        w.put_u8(self.tag_id_specified as u8)?;
        w.put_u8(0)?;
        w.put_u8(0)?;
        w.put_u8(0)?;
        for r in [
            self.service_name,
            self.display_name,
            self.binary_path_name,
            self.load_order_group,
            self.dependencies,
            self.service_start_name,
            self.password,
        ] {
            w.put_bytes(&r.encode())?;
        }
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let service_type = r.get_u32()?;
        let start_type = r.get_u32()?;
        let error_control = r.get_u32()?;
        let tag_id_specified = r.get_u8()? != 0;
        r.get_u8()?;
        r.get_u8()?;
        r.get_u8()?;
        let mut refs = [RelativeRef::NULL; 7];
        for slot in &mut refs {
            *slot = RelativeRef::decode(r.get_bytes(8)?)?;
        }
        Ok(Self {
            service_type,
            start_type,
            error_control,
            tag_id_specified,
            service_name: refs[0],
            display_name: refs[1],
            binary_path_name: refs[2],
            load_order_group: refs[3],
            dependencies: refs[4],
            service_start_name: refs[5],
            password: refs[6],
        })
    }
}

/// Request payloads, one variant per operation selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestPayload {
    Plugin {
        api_id: RelativeRef,
        data: Vec<u8>,
    },
    ExecuteRunAsCommand(RunAsPayload),
    UnloadDriver {
        /// Zero when unloading by name only.
        base_address: u64,
        name: RelativeRef,
    },
    ControlProcess {
        process_id: u32,
        command: ProcessCommand,
        argument: u32,
    },
    ControlService {
        service_name: RelativeRef,
        command: ServiceCommand,
    },
    CreateService(ServiceConfigPayload),
    ChangeServiceConfig(ServiceConfigPayload),
    ChangeServiceConfig2 {
        info_level: u32,
        service_name: RelativeRef,
        info: RelativeRef,
    },
    SetTcpEntry {
        state: u32,
        local_address: u32,
        local_port: u32,
        remote_address: u32,
        remote_port: u32,
    },
    ControlThread {
        thread_id: u32,
        command: ThreadCommand,
        argument: u32,
    },
    AddAccountRight {
        account_sid: RelativeRef,
        user_right: RelativeRef,
    },
    InvokeRunAsService(RunAsPayload),
    IssueMemoryListCommand {
        command: u32,
    },
    PostMessage {
        window: u64,
        message: u32,
        wparam: u64,
        lparam: u64,
    },
    SendMessage {
        window: u64,
        message: u32,
        wparam: u64,
        lparam: u64,
    },
    CreateProcessIgnoringDebugger {
        file_name: RelativeRef,
        command_line: RelativeRef,
    },
    SetServiceSecurity {
        security_information: u32,
        service_name: RelativeRef,
        security_descriptor: RelativeRef,
    },
    WriteMiniDumpProcess {
        /// Index of the process descriptor in the attached descriptor list.
        process_fd_index: u32,
        /// Index of the output file descriptor in the attached list.
        file_fd_index: u32,
        process_id: u32,
        dump_type: u32,
    },
    QueryProcessHeapInformation {
        process_id: u32,
        data: RelativeRef,
    },
}

impl RequestPayload {
    pub fn api_number(&self) -> ApiNumber {
        use RequestPayload::*;
        match self {
            Plugin { .. } => ApiNumber::Plugin,
            ExecuteRunAsCommand(_) => ApiNumber::ExecuteRunAsCommand,
            UnloadDriver { .. } => ApiNumber::UnloadDriver,
            ControlProcess { .. } => ApiNumber::ControlProcess,
            ControlService { .. } => ApiNumber::ControlService,
            CreateService(_) => ApiNumber::CreateService,
            ChangeServiceConfig(_) => ApiNumber::ChangeServiceConfig,
            ChangeServiceConfig2 { .. } => ApiNumber::ChangeServiceConfig2,
            SetTcpEntry { .. } => ApiNumber::SetTcpEntry,
            ControlThread { .. } => ApiNumber::ControlThread,
            AddAccountRight { .. } => ApiNumber::AddAccountRight,
            InvokeRunAsService(_) => ApiNumber::InvokeRunAsService,
            IssueMemoryListCommand { .. } => ApiNumber::IssueMemoryListCommand,
            PostMessage { .. } => ApiNumber::PostMessage,
            SendMessage { .. } => ApiNumber::SendMessage,
            CreateProcessIgnoringDebugger { .. } => ApiNumber::CreateProcessIgnoringDebugger,
            SetServiceSecurity { .. } => ApiNumber::SetServiceSecurity,
            WriteMiniDumpProcess { .. } => ApiNumber::WriteMiniDumpProcess,
            QueryProcessHeapInformation { .. } => ApiNumber::QueryProcessHeapInformation,
        }
    }

    /// Encodes into a zeroed payload area of at least [`PAYLOAD_SIZE`] bytes.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), WireError> {
        if buf.len() < PAYLOAD_SIZE {
            return Err(WireError::Truncated("payload area"));
        }
        let mut w = Writer::new(buf);
        use RequestPayload::*;
        match self {
            Plugin { api_id, data } => {
                if data.len() > PLUGIN_DATA_MAX {
                    return Err(WireError::PayloadTooLarge("plugin request data"));
                }
                w.put_bytes(&api_id.encode())?;
                w.put_u32(data.len() as u32)?;
                w.put_bytes(data)?;
            }
            ExecuteRunAsCommand(p) | InvokeRunAsService(p) => p.encode(&mut w)?,
            UnloadDriver { base_address, name } => {
                w.put_u64(*base_address)?;
                w.put_bytes(&name.encode())?;
            }
            ControlProcess {
                process_id,
                command,
                argument,
            } => {
                w.put_u32(*process_id)?;
                w.put_u32(*command as u32)?;
                w.put_u32(*argument)?;
            }
            ControlService {
                service_name,
                command,
            } => {
                w.put_bytes(&service_name.encode())?;
                w.put_u32(*command as u32)?;
            }
            CreateService(p) | ChangeServiceConfig(p) => p.encode(&mut w)?,
            ChangeServiceConfig2 {
                info_level,
                service_name,
                info,
            } => {
                w.put_u32(*info_level)?;
                w.put_u32(0)?;
                w.put_bytes(&service_name.encode())?;
                w.put_bytes(&info.encode())?;
            }
            SetTcpEntry {
                state,
                local_address,
                local_port,
                remote_address,
                remote_port,
            } => {
                w.put_u32(*state)?;
                w.put_u32(*local_address)?;
                w.put_u32(*local_port)?;
                w.put_u32(*remote_address)?;
                w.put_u32(*remote_port)?;
            }
            ControlThread {
                thread_id,
                command,
                argument,
            } => {
                w.put_u32(*thread_id)?;
                w.put_u32(*command as u32)?;
                w.put_u32(*argument)?;
            }
            AddAccountRight {
                account_sid,
                user_right,
            } => {
                w.put_bytes(&account_sid.encode())?;
                w.put_bytes(&user_right.encode())?;
            }
            IssueMemoryListCommand { command } => {
                w.put_u32(*command)?;
            }
            PostMessage {
                window,
                message,
                wparam,
                lparam,
            }
            | SendMessage {
                window,
                message,
                wparam,
                lparam,
            } => {
                w.put_u64(*window)?;
                w.put_u32(*message)?;
                w.put_u32(0)?;
                w.put_u64(*wparam)?;
                w.put_u64(*lparam)?;
            }
            CreateProcessIgnoringDebugger {
                file_name,
                command_line,
            } => {
                w.put_bytes(&file_name.encode())?;
                w.put_bytes(&command_line.encode())?;
            }
            SetServiceSecurity {
                security_information,
                service_name,
                security_descriptor,
            } => {
                w.put_u32(*security_information)?;
                w.put_u32(0)?;
                w.put_bytes(&service_name.encode())?;
                w.put_bytes(&security_descriptor.encode())?;
            }
            WriteMiniDumpProcess {
                process_fd_index,
                file_fd_index,
                process_id,
                dump_type,
            } => {
                w.put_u32(*process_fd_index)?;
                w.put_u32(*file_fd_index)?;
                w.put_u32(*process_id)?;
                w.put_u32(*dump_type)?;
            }
            QueryProcessHeapInformation { process_id, data } => {
                w.put_u32(*process_id)?;
                w.put_u32(0)?;
                w.put_bytes(&data.encode())?;
            }
        }
        Ok(())
    }

    /// Decodes the payload area for the given selector.
    pub fn decode(api: ApiNumber, buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < PAYLOAD_SIZE {
            return Err(WireError::Truncated("payload area"));
        }
        let mut r = Reader::new(buf);
        Ok(match api {
            ApiNumber::Plugin => {
                let api_id = RelativeRef::decode(r.get_bytes(8)?)?;
                let len = r.get_u32()? as usize;
                if len > PLUGIN_DATA_MAX {
                    return Err(WireError::PayloadTooLarge("plugin request data"));
                }
                let data = r.get_bytes(PLUGIN_DATA_MAX)?[..len].to_vec();
                RequestPayload::Plugin { api_id, data }
            }
            ApiNumber::ExecuteRunAsCommand => {
                RequestPayload::ExecuteRunAsCommand(RunAsPayload::decode(&mut r)?)
            }
            ApiNumber::InvokeRunAsService => {
                RequestPayload::InvokeRunAsService(RunAsPayload::decode(&mut r)?)
            }
            ApiNumber::UnloadDriver => RequestPayload::UnloadDriver {
                base_address: r.get_u64()?,
                name: RelativeRef::decode(r.get_bytes(8)?)?,
            },
            ApiNumber::ControlProcess => RequestPayload::ControlProcess {
                process_id: r.get_u32()?,
                command: ProcessCommand::from_u32(r.get_u32()?)?,
                argument: r.get_u32()?,
            },
            ApiNumber::ControlService => RequestPayload::ControlService {
                service_name: RelativeRef::decode(r.get_bytes(8)?)?,
                command: ServiceCommand::from_u32(r.get_u32()?)?,
            },
            ApiNumber::CreateService => {
                RequestPayload::CreateService(ServiceConfigPayload::decode(&mut r)?)
            }
            ApiNumber::ChangeServiceConfig => {
                RequestPayload::ChangeServiceConfig(ServiceConfigPayload::decode(&mut r)?)
            }
            ApiNumber::ChangeServiceConfig2 => {
                let info_level = r.get_u32()?;
                r.get_u32()?;
                RequestPayload::ChangeServiceConfig2 {
                    info_level,
                    service_name: RelativeRef::decode(r.get_bytes(8)?)?,
                    info: RelativeRef::decode(r.get_bytes(8)?)?,
                }
            }
            ApiNumber::SetTcpEntry => RequestPayload::SetTcpEntry {
                state: r.get_u32()?,
                local_address: r.get_u32()?,
                local_port: r.get_u32()?,
                remote_address: r.get_u32()?,
                remote_port: r.get_u32()?,
            },
            ApiNumber::ControlThread => RequestPayload::ControlThread {
                thread_id: r.get_u32()?,
                command: ThreadCommand::from_u32(r.get_u32()?)?,
                argument: r.get_u32()?,
            },
            ApiNumber::AddAccountRight => RequestPayload::AddAccountRight {
                account_sid: RelativeRef::decode(r.get_bytes(8)?)?,
                user_right: RelativeRef::decode(r.get_bytes(8)?)?,
            },
            ApiNumber::IssueMemoryListCommand => RequestPayload::IssueMemoryListCommand {
                command: r.get_u32()?,
            },
            ApiNumber::PostMessage | ApiNumber::SendMessage => {
                let window = r.get_u64()?;
                let message = r.get_u32()?;
                r.get_u32()?;
                let wparam = r.get_u64()?;
                let lparam = r.get_u64()?;
                if api == ApiNumber::PostMessage {
                    RequestPayload::PostMessage {
                        window,
                        message,
                        wparam,
                        lparam,
                    }
                } else {
                    RequestPayload::SendMessage {
                        window,
                        message,
                        wparam,
                        lparam,
                    }
                }
            }
            ApiNumber::CreateProcessIgnoringDebugger => {
                RequestPayload::CreateProcessIgnoringDebugger {
                    file_name: RelativeRef::decode(r.get_bytes(8)?)?,
                    command_line: RelativeRef::decode(r.get_bytes(8)?)?,
                }
            }
            ApiNumber::SetServiceSecurity => {
                let security_information = r.get_u32()?;
                r.get_u32()?;
                RequestPayload::SetServiceSecurity {
                    security_information,
                    service_name: RelativeRef::decode(r.get_bytes(8)?)?,
                    security_descriptor: RelativeRef::decode(r.get_bytes(8)?)?,
                }
            }
            ApiNumber::WriteMiniDumpProcess => RequestPayload::WriteMiniDumpProcess {
                process_fd_index: r.get_u32()?,
                file_fd_index: r.get_u32()?,
                process_id: r.get_u32()?,
                dump_type: r.get_u32()?,
            },
            ApiNumber::QueryProcessHeapInformation => {
                let process_id = r.get_u32()?;
                r.get_u32()?;
                RequestPayload::QueryProcessHeapInformation {
                    process_id,
                    data: RelativeRef::decode(r.get_bytes(8)?)?,
                }
            }
        })
    }
}

/// Reply payloads. Operations without reply data use `Empty`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyPayload {
    Empty,
    Plugin {
        data: Vec<u8>,
    },
    CreateService {
        tag_id: u32,
    },
    ChangeServiceConfig {
        tag_id: u32,
    },
    QueryProcessHeapInformation {
        /// Bytes written (on success) or required (on buffer-too-small).
        data_length: u32,
    },
}

impl ReplyPayload {
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), WireError> {
        if buf.len() < PAYLOAD_SIZE {
            return Err(WireError::Truncated("payload area"));
        }
        let mut w = Writer::new(buf);
        match self {
            ReplyPayload::Empty => {}
            ReplyPayload::Plugin { data } => {
                if data.len() > PLUGIN_DATA_MAX {
                    return Err(WireError::PayloadTooLarge("plugin reply data"));
                }
                w.put_u32(data.len() as u32)?;
                w.put_bytes(data)?;
            }
            ReplyPayload::CreateService { tag_id } | ReplyPayload::ChangeServiceConfig { tag_id } => {
                w.put_u32(*tag_id)?;
            }
            ReplyPayload::QueryProcessHeapInformation { data_length } => {
                w.put_u32(*data_length)?;
            }
        }
        Ok(())
    }

    pub fn decode(api: ApiNumber, buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < PAYLOAD_SIZE {
            return Err(WireError::Truncated("payload area"));
        }
        let mut r = Reader::new(buf);
        Ok(match api {
            ApiNumber::Plugin => {
                let len = r.get_u32()? as usize;
                if len > PLUGIN_DATA_MAX {
                    return Err(WireError::PayloadTooLarge("plugin reply data"));
                }
                ReplyPayload::Plugin {
                    data: r.get_bytes(PLUGIN_DATA_MAX)?[..len].to_vec(),
                }
            }
            ApiNumber::CreateService => ReplyPayload::CreateService {
                tag_id: r.get_u32()?,
            },
            ApiNumber::ChangeServiceConfig => ReplyPayload::ChangeServiceConfig {
                tag_id: r.get_u32()?,
            },
            ApiNumber::QueryProcessHeapInformation => ReplyPayload::QueryProcessHeapInformation {
                data_length: r.get_u32()?,
            },
            ApiNumber::ExecuteRunAsCommand
            | ApiNumber::UnloadDriver
            | ApiNumber::ControlProcess
            | ApiNumber::ControlService
            | ApiNumber::ChangeServiceConfig2
            | ApiNumber::SetTcpEntry
            | ApiNumber::ControlThread
            | ApiNumber::AddAccountRight
            | ApiNumber::InvokeRunAsService
            | ApiNumber::IssueMemoryListCommand
            | ApiNumber::PostMessage
            | ApiNumber::SendMessage
            | ApiNumber::CreateProcessIgnoringDebugger
            | ApiNumber::SetServiceSecurity
            | ApiNumber::WriteMiniDumpProcess => ReplyPayload::Empty,
        })
    }
}
