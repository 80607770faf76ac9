//! Second-level service configuration payloads.
//!
//! `ChangeServiceConfig2` is sub-dispatched by info level. Most levels are a
//! single fixed-size value; failure actions, required privileges and
//! trigger descriptors are nested variable-length structures flattened with
//! [`PackBuilder`](crate::pack::PackBuilder) before entering the arena.

use uuid::Uuid;

use crate::WireError;
use crate::codec::Reader;
use crate::codec::Writer;
use crate::pack::PackBuilder;
use crate::pack::PackedReader;
use crate::wstr;

// First-level configuration values used with `CreateService` and
// `ChangeServiceConfig`; pass-through, same numbering as the service
// manager's own.
pub const SERVICE_WIN32_OWN_PROCESS: u32 = 0x10;
pub const SERVICE_DEMAND_START: u32 = 3;
pub const SERVICE_ERROR_IGNORE: u32 = 0;

pub const INFO_FAILURE_ACTIONS: u32 = 2;
pub const INFO_DELAYED_AUTO_START: u32 = 3;
pub const INFO_FAILURE_ACTIONS_FLAG: u32 = 4;
pub const INFO_SERVICE_SID: u32 = 5;
pub const INFO_REQUIRED_PRIVILEGES: u32 = 6;
pub const INFO_PRESHUTDOWN: u32 = 7;
pub const INFO_TRIGGER: u32 = 8;
pub const INFO_LAUNCH_PROTECTED: u32 = 12;

pub const TRIGGER_DATA_BINARY: u32 = 1;
pub const TRIGGER_DATA_STRING: u32 = 2;
pub const TRIGGER_DATA_LEVEL: u32 = 3;
pub const TRIGGER_DATA_KEYWORD_ANY: u32 = 4;
pub const TRIGGER_DATA_KEYWORD_ALL: u32 = 5;

// Blob layouts. Offsets are part of the wire contract.
const FAILURE_ACTIONS_ROOT: usize = 40;
const FA_RESET_PERIOD: usize = 0;
const FA_REBOOT_MSG: usize = 8;
const FA_COMMAND: usize = 16;
const FA_ACTION_COUNT: usize = 24;
const FA_ACTIONS: usize = 32;
const SC_ACTION_SIZE: usize = 8;

const TRIGGER_INFO_ROOT: usize = 16;
const TI_COUNT: usize = 0;
const TI_TRIGGERS: usize = 8;
const TRIGGER_SIZE: usize = 32;
const TR_TYPE: usize = 0;
const TR_ACTION: usize = 4;
const TR_SUBTYPE: usize = 8;
const TR_DATA_COUNT: usize = 16;
const TR_DATA_ITEMS: usize = 24;
const DATA_ITEM_SIZE: usize = 16;
const DI_TYPE: usize = 0;
const DI_DATA: usize = 8;

const PRIVILEGES_ROOT: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScAction {
    pub action_type: u32,
    pub delay_ms: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceFailureActions {
    pub reset_period_secs: u32,
    pub reboot_message: Option<String>,
    pub command: Option<String>,
    pub actions: Vec<ScAction>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceTriggerData {
    pub data_type: u32,
    pub data: Vec<u8>,
}

impl ServiceTriggerData {
    fn alignment(&self) -> usize {
        match self.data_type {
            TRIGGER_DATA_STRING => 2,
            TRIGGER_DATA_KEYWORD_ANY | TRIGGER_DATA_KEYWORD_ALL => 8,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceTrigger {
    pub trigger_type: u32,
    pub action: u32,
    pub subtype: Uuid,
    pub data_items: Vec<ServiceTriggerData>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceTriggerInfo {
    pub triggers: Vec<ServiceTrigger>,
}

/// One `ChangeServiceConfig2` payload, tagged by info level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceConfig2 {
    FailureActions(ServiceFailureActions),
    DelayedAutoStart(bool),
    FailureActionsFlag(bool),
    SidInfo(u32),
    RequiredPrivileges(Vec<String>),
    Preshutdown { timeout_ms: u32 },
    TriggerInfo(ServiceTriggerInfo),
    LaunchProtected(u32),
}

impl ServiceConfig2 {
    pub fn info_level(&self) -> u32 {
        match self {
            ServiceConfig2::FailureActions(_) => INFO_FAILURE_ACTIONS,
            ServiceConfig2::DelayedAutoStart(_) => INFO_DELAYED_AUTO_START,
            ServiceConfig2::FailureActionsFlag(_) => INFO_FAILURE_ACTIONS_FLAG,
            ServiceConfig2::SidInfo(_) => INFO_SERVICE_SID,
            ServiceConfig2::RequiredPrivileges(_) => INFO_REQUIRED_PRIVILEGES,
            ServiceConfig2::Preshutdown { .. } => INFO_PRESHUTDOWN,
            ServiceConfig2::TriggerInfo(_) => INFO_TRIGGER,
            ServiceConfig2::LaunchProtected(_) => INFO_LAUNCH_PROTECTED,
        }
    }

    /// Flattens the payload into the blob placed behind the envelope's info
    /// reference.
    pub fn pack(&self) -> Result<Vec<u8>, WireError> {
        Ok(match self {
            ServiceConfig2::FailureActions(fa) => pack_failure_actions(fa)?,
            ServiceConfig2::DelayedAutoStart(enabled)
            | ServiceConfig2::FailureActionsFlag(enabled) => {
                u32::from(*enabled).to_le_bytes().to_vec()
            }
            ServiceConfig2::SidInfo(value) | ServiceConfig2::LaunchProtected(value) => {
                value.to_le_bytes().to_vec()
            }
            ServiceConfig2::Preshutdown { timeout_ms } => timeout_ms.to_le_bytes().to_vec(),
            ServiceConfig2::RequiredPrivileges(privileges) => pack_required_privileges(privileges)?,
            ServiceConfig2::TriggerInfo(info) => pack_trigger_info(info)?,
        })
    }

    /// Reads a blob back into its typed form. This is the broker-side view
    /// of the same layouts.
    pub fn unpack(info_level: u32, blob: &[u8]) -> Result<Self, WireError> {
        Ok(match info_level {
            INFO_FAILURE_ACTIONS => ServiceConfig2::FailureActions(unpack_failure_actions(blob)?),
            INFO_DELAYED_AUTO_START => ServiceConfig2::DelayedAutoStart(read_u32(blob)? != 0),
            INFO_FAILURE_ACTIONS_FLAG => ServiceConfig2::FailureActionsFlag(read_u32(blob)? != 0),
            INFO_SERVICE_SID => ServiceConfig2::SidInfo(read_u32(blob)?),
            INFO_REQUIRED_PRIVILEGES => {
                ServiceConfig2::RequiredPrivileges(unpack_required_privileges(blob)?)
            }
            INFO_PRESHUTDOWN => ServiceConfig2::Preshutdown {
                timeout_ms: read_u32(blob)?,
            },
            INFO_TRIGGER => ServiceConfig2::TriggerInfo(unpack_trigger_info(blob)?),
            INFO_LAUNCH_PROTECTED => ServiceConfig2::LaunchProtected(read_u32(blob)?),
            _ => return Err(WireError::Malformed("unknown service config info level")),
        })
    }
}

fn read_u32(blob: &[u8]) -> Result<u32, WireError> {
    Reader::new(blob).get_u32()
}

fn pack_failure_actions(fa: &ServiceFailureActions) -> Result<Vec<u8>, WireError> {
    let mut root = [0u8; FAILURE_ACTIONS_ROOT];
    {
        let mut w = Writer::new(&mut root);
        w.put_u32(fa.reset_period_secs)?;
    }
    {
        let mut w = Writer::new(&mut root[FA_ACTION_COUNT..]);
        w.put_u32(fa.actions.len() as u32)?;
    }

    let mut builder = PackBuilder::with_capacity(200);
    let base = builder.pack_root(&root);

    let reboot_slot = builder.slot(base, FA_REBOOT_MSG)?;
    let reboot = fa.reboot_message.as_deref().map(wstr::encode).unwrap_or_default();
    builder.pack_field(reboot_slot, &reboot, 2)?;

    let command_slot = builder.slot(base, FA_COMMAND)?;
    let command = fa.command.as_deref().map(wstr::encode).unwrap_or_default();
    builder.pack_field(command_slot, &command, 2)?;

    if !fa.actions.is_empty() {
        let mut actions = Vec::with_capacity(fa.actions.len() * SC_ACTION_SIZE);
        for action in &fa.actions {
            actions.extend_from_slice(&action.action_type.to_le_bytes());
            actions.extend_from_slice(&action.delay_ms.to_le_bytes());
        }
        let actions_slot = builder.slot(base, FA_ACTIONS)?;
        builder.pack_field(actions_slot, &actions, 4)?;
    }

    Ok(builder.finish())
}

fn unpack_failure_actions(blob: &[u8]) -> Result<ServiceFailureActions, WireError> {
    let reader = PackedReader::new(blob);
    if blob.len() < FAILURE_ACTIONS_ROOT {
        return Err(WireError::Truncated("failure actions root"));
    }

    let mut r = Reader::new(blob);
    let reset_period_secs = r.get_u32()?;
    let action_count = Reader::new(&blob[FA_ACTION_COUNT..]).get_u32()? as usize;

    let reboot_message = reader
        .field(FA_REBOOT_MSG)?
        .map(wstr::decode)
        .transpose()?;
    let command = reader.field(FA_COMMAND)?.map(wstr::decode).transpose()?;

    let mut actions = Vec::with_capacity(action_count);
    if action_count != 0 {
        let raw = reader
            .field(FA_ACTIONS)?
            .ok_or(WireError::NullRef)?;
        if raw.len() != action_count * SC_ACTION_SIZE {
            return Err(WireError::Malformed("failure action array length"));
        }
        for chunk in raw.chunks_exact(SC_ACTION_SIZE) {
            let mut r = Reader::new(chunk);
            actions.push(ScAction {
                action_type: r.get_u32()?,
                delay_ms: r.get_u32()?,
            });
        }
    }

    Ok(ServiceFailureActions {
        reset_period_secs,
        reboot_message,
        command,
        actions,
    })
}

fn pack_required_privileges(privileges: &[String]) -> Result<Vec<u8>, WireError> {
    let mut builder = PackBuilder::with_capacity(100);
    let base = builder.pack_root(&[0u8; PRIVILEGES_ROOT]);
    let slot = builder.slot(base, 0)?;
    builder.pack_field(slot, &wstr::encode_multi(privileges), 2)?;
    Ok(builder.finish())
}

fn unpack_required_privileges(blob: &[u8]) -> Result<Vec<String>, WireError> {
    let reader = PackedReader::new(blob);
    let raw = reader.field(0)?.ok_or(WireError::NullRef)?;
    wstr::decode_multi(raw)
}

fn pack_trigger_info(info: &ServiceTriggerInfo) -> Result<Vec<u8>, WireError> {
    let mut root = [0u8; TRIGGER_INFO_ROOT];
    Writer::new(&mut root).put_u32(info.triggers.len() as u32)?;

    let mut builder = PackBuilder::with_capacity(400);
    let base = builder.pack_root(&root);

    if info.triggers.is_empty() {
        return Ok(builder.finish());
    }

    // Depth-first: the trigger array first, then each trigger's subtype and
    // data-item array, then each item's blob. Fixed fields are filled in up
    // front; reference fields are patched as their targets land.
    let mut triggers_block = vec![0u8; info.triggers.len() * TRIGGER_SIZE];
    for (i, trigger) in info.triggers.iter().enumerate() {
        let at = i * TRIGGER_SIZE;
        let mut w = Writer::new(&mut triggers_block[at + TR_TYPE..at + TR_SUBTYPE]);
        w.put_u32(trigger.trigger_type)?;
        w.put_u32(trigger.action)?;
        Writer::new(&mut triggers_block[at + TR_DATA_COUNT..])
            .put_u32(trigger.data_items.len() as u32)?;
    }
    let triggers_slot = builder.slot(base, TI_TRIGGERS)?;
    let triggers_ref = builder.pack_field(triggers_slot, &triggers_block, 8)?;
    let triggers_base = triggers_ref.offset as usize;

    for (i, trigger) in info.triggers.iter().enumerate() {
        let trigger_base = triggers_base + i * TRIGGER_SIZE;

        let subtype_slot = builder.slot(trigger_base, TR_SUBTYPE)?;
        builder.pack_field(subtype_slot, trigger.subtype.as_bytes(), 4)?;

        if trigger.data_items.is_empty() {
            continue;
        }

        let mut items_block = vec![0u8; trigger.data_items.len() * DATA_ITEM_SIZE];
        for (j, item) in trigger.data_items.iter().enumerate() {
            Writer::new(&mut items_block[j * DATA_ITEM_SIZE + DI_TYPE..])
                .put_u32(item.data_type)?;
        }
        let items_slot = builder.slot(trigger_base, TR_DATA_ITEMS)?;
        let items_ref = builder.pack_field(items_slot, &items_block, 8)?;
        let items_base = items_ref.offset as usize;

        for (j, item) in trigger.data_items.iter().enumerate() {
            let item_base = items_base + j * DATA_ITEM_SIZE;
            let data_slot = builder.slot(item_base, DI_DATA)?;
            builder.pack_field(data_slot, &item.data, item.alignment())?;
        }
    }

    Ok(builder.finish())
}

fn unpack_trigger_info(blob: &[u8]) -> Result<ServiceTriggerInfo, WireError> {
    let reader = PackedReader::new(blob);
    if blob.len() < TRIGGER_INFO_ROOT {
        return Err(WireError::Truncated("trigger info root"));
    }
    let count = Reader::new(blob).get_u32()? as usize;

    let mut triggers = Vec::with_capacity(count);
    if count == 0 {
        return Ok(ServiceTriggerInfo { triggers });
    }

    let triggers_ref = reader.ref_at(TI_TRIGGERS)?;
    let block = reader.resolve(triggers_ref)?.ok_or(WireError::NullRef)?;
    if block.len() != count * TRIGGER_SIZE {
        return Err(WireError::Malformed("trigger array length"));
    }
    let triggers_base = triggers_ref.offset as usize;

    for i in 0..count {
        let at = triggers_base + i * TRIGGER_SIZE;
        let mut r = Reader::new(&blob[at..at + TRIGGER_SIZE]);
        let trigger_type = r.get_u32()?;
        let action = r.get_u32()?;

        let subtype_raw = reader.field(at + TR_SUBTYPE)?.ok_or(WireError::NullRef)?;
        let subtype = Uuid::from_slice(subtype_raw)
            .map_err(|_| WireError::Malformed("trigger subtype length"))?;

        let data_count = Reader::new(&blob[at + TR_DATA_COUNT..]).get_u32()? as usize;
        let mut data_items = Vec::with_capacity(data_count);
        if data_count != 0 {
            let items_ref = reader.ref_at(at + TR_DATA_ITEMS)?;
            let items = reader.resolve(items_ref)?.ok_or(WireError::NullRef)?;
            if items.len() != data_count * DATA_ITEM_SIZE {
                return Err(WireError::Malformed("trigger data item array length"));
            }
            let items_base = items_ref.offset as usize;
            for j in 0..data_count {
                let item_at = items_base + j * DATA_ITEM_SIZE;
                let data_type = Reader::new(&blob[item_at..]).get_u32()?;
                let data = reader
                    .field(item_at + DI_DATA)?
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default();
                data_items.push(ServiceTriggerData { data_type, data });
            }
        }

        triggers.push(ServiceTrigger {
            trigger_type,
            action,
            subtype,
            data_items,
        });
    }

    Ok(ServiceTriggerInfo { triggers })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_trigger_info() -> ServiceTriggerInfo {
        ServiceTriggerInfo {
            triggers: vec![
                ServiceTrigger {
                    trigger_type: 1,
                    action: 1,
                    subtype: Uuid::from_u128(0x1c8d_34b1_0000_0000_0000_000000000001),
                    data_items: vec![
                        ServiceTriggerData {
                            data_type: TRIGGER_DATA_STRING,
                            data: wstr::encode("tcp/135"),
                        },
                        ServiceTriggerData {
                            data_type: TRIGGER_DATA_BINARY,
                            data: vec![0xDE, 0xAD, 0xBE, 0xEF, 0x01],
                        },
                    ],
                },
                ServiceTrigger {
                    trigger_type: 4,
                    action: 2,
                    subtype: Uuid::from_u128(0x1c8d_34b1_0000_0000_0000_000000000002),
                    data_items: vec![
                        ServiceTriggerData {
                            data_type: TRIGGER_DATA_KEYWORD_ANY,
                            data: 0x4000_0000_0000_0001u64.to_le_bytes().to_vec(),
                        },
                        ServiceTriggerData {
                            data_type: TRIGGER_DATA_LEVEL,
                            data: vec![4],
                        },
                    ],
                },
            ],
        }
    }

    #[test]
    fn nested_trigger_info_round_trips_byte_identically() {
        let info = sample_trigger_info();
        let blob = ServiceConfig2::TriggerInfo(info.clone()).pack().unwrap();
        let unpacked = ServiceConfig2::unpack(INFO_TRIGGER, &blob).unwrap();
        let ServiceConfig2::TriggerInfo(decoded) = unpacked else {
            panic!("wrong variant");
        };
        // Every data payload comes back byte-identical.
        assert_eq!(decoded, info);

        // And the flattened form is deterministic.
        let again = ServiceConfig2::TriggerInfo(decoded).pack().unwrap();
        assert_eq!(again, blob);
    }

    #[test]
    fn failure_actions_round_trip() {
        let fa = ServiceFailureActions {
            reset_period_secs: 86400,
            reboot_message: Some("service failed, rebooting".to_string()),
            command: None,
            actions: vec![
                ScAction {
                    action_type: 1,
                    delay_ms: 60_000,
                },
                ScAction {
                    action_type: 2,
                    delay_ms: 0,
                },
            ],
        };
        let blob = ServiceConfig2::FailureActions(fa.clone()).pack().unwrap();
        assert_eq!(
            ServiceConfig2::unpack(INFO_FAILURE_ACTIONS, &blob).unwrap(),
            ServiceConfig2::FailureActions(fa)
        );
    }

    #[test]
    fn required_privileges_round_trip() {
        let privileges = vec![
            "SeBackupPrivilege".to_string(),
            "SeRestorePrivilege".to_string(),
        ];
        let blob = ServiceConfig2::RequiredPrivileges(privileges.clone())
            .pack()
            .unwrap();
        assert_eq!(
            ServiceConfig2::unpack(INFO_REQUIRED_PRIVILEGES, &blob).unwrap(),
            ServiceConfig2::RequiredPrivileges(privileges)
        );
    }

    #[test]
    fn scalar_levels_round_trip() {
        for config in [
            ServiceConfig2::DelayedAutoStart(true),
            ServiceConfig2::FailureActionsFlag(false),
            ServiceConfig2::SidInfo(1),
            ServiceConfig2::Preshutdown { timeout_ms: 20_000 },
            ServiceConfig2::LaunchProtected(3),
        ] {
            let blob = config.pack().unwrap();
            assert_eq!(
                ServiceConfig2::unpack(config.info_level(), &blob).unwrap(),
                config
            );
        }
    }

    #[test]
    fn empty_trigger_list_packs_to_root_only() {
        let blob = ServiceConfig2::TriggerInfo(ServiceTriggerInfo::default())
            .pack()
            .unwrap();
        assert_eq!(blob.len(), TRIGGER_INFO_ROOT);
        assert_eq!(
            ServiceConfig2::unpack(INFO_TRIGGER, &blob).unwrap(),
            ServiceConfig2::TriggerInfo(ServiceTriggerInfo::default())
        );
    }
}
