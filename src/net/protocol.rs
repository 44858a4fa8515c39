//! Simulation socket protocol
//!
//! Inbound frames are decoded into [`InboundFrame`]; tick payloads are passed
//! through untouched so the battle can parse them without a JSON round trip.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::types::{BattleId, GameLocation};

/// Battle commands exchanged with the simulation process
pub mod commands {
    pub const BATTLE_INIT: &str = "BATTLE:INIT";
    pub const BATTLE_ABILITY: &str = "BATTLE:ABILITY";
    pub const BATTLE_START: &str = "BATTLE:START";
    pub const BATTLE_MAP_DETAILS: &str = "BATTLE:MAP_DETAILS";
    pub const BATTLE_WAR_MACHINE_DESTROYED: &str = "BATTLE:WAR_MACHINE_DESTROYED";
    pub const BATTLE_END: &str = "BATTLE:END";
    pub const BATTLE_ABILITY_CHECK_RESPONSE: &str = "BATTLE:ABILITY_CHECK_RESPONSE";
}

/// First byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Json = 0,
    Tick = 1,
    LiveVotingTick = 2,
    ViewerLiveCountTick = 3,
    SpoilOfWarTick = 4,
    GameAbilityProgressTick = 5,
    BattleAbilityProgressTick = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::Json,
            1 => MessageType::Tick,
            2 => MessageType::LiveVotingTick,
            3 => MessageType::ViewerLiveCountTick,
            4 => MessageType::SpoilOfWarTick,
            5 => MessageType::GameAbilityProgressTick,
            6 => MessageType::BattleAbilityProgressTick,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Empty frame")]
    EmptyFrame,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("Malformed JSON envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("Empty payload for {0}")]
    EmptyPayload(String),
    #[error("Malformed payload for {command}: {source}")]
    Payload {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct BattleMsg {
    #[serde(rename = "battleCommand")]
    battle_command: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct OutboundMsg<'a, T: Serialize> {
    #[serde(rename = "battleCommand")]
    battle_command: &'a str,
    payload: &'a T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartWarMachine {
    pub hash: String,
    #[serde(rename = "participantID")]
    pub participant_id: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BattleStartPayload {
    #[serde(rename = "warMachines")]
    pub war_machines: Vec<StartWarMachine>,
    #[serde(rename = "battleID")]
    pub battle_id: BattleId,
    #[serde(rename = "clientBuildNo", default)]
    pub client_build_no: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDetails {
    pub name: String,
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub cells_x: i32,
    #[serde(default)]
    pub cells_y: i32,
    #[serde(default)]
    pub disabled_cells: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapDetailsPayload {
    pub details: MapDetails,
    #[serde(rename = "battleID")]
    pub battle_id: BattleId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageHistory {
    pub amount: i32,
    pub instigator_hash: String,
    pub source_hash: String,
    pub source_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyedWarMachineEvent {
    pub destroyed_war_machine_hash: String,
    #[serde(default)]
    pub kill_by_war_machine_hash: Option<String>,
    #[serde(rename = "relatedEventID", default)]
    pub related_event_id: Option<String>,
    #[serde(default)]
    pub damage_history: Vec<DamageHistory>,
    #[serde(default)]
    pub killed_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarMachineDestroyedPayload {
    #[serde(rename = "destroyedWarMachineEvent")]
    pub event: DestroyedWarMachineEvent,
    #[serde(rename = "battleID")]
    pub battle_id: BattleId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WinningWarMachine {
    pub hash: String,
    pub health: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BattleEndPayload {
    #[serde(rename = "winningWarMachines")]
    pub winning_war_machines: Vec<WinningWarMachine>,
    #[serde(rename = "battleID")]
    pub battle_id: BattleId,
    #[serde(rename = "winCondition", default)]
    pub win_condition: String,
}

/// Reply to a `BATTLE:ABILITY` location check
#[derive(Debug, Clone, Deserialize)]
pub struct AbilityCheckResponse {
    #[serde(rename = "eventID")]
    pub event_id: Uuid,
    #[serde(rename = "isValid")]
    pub is_valid: bool,
}

/// Outbound `BATTLE:ABILITY` payload
#[derive(Debug, Clone, Serialize)]
pub struct GameAbilityEvent {
    #[serde(rename = "isTriggered")]
    pub is_triggered: bool,
    #[serde(rename = "gameClientAbilityID")]
    pub game_client_ability_id: u8,
    #[serde(rename = "warMachineHash", skip_serializing_if = "Option::is_none")]
    pub war_machine_hash: Option<String>,
    #[serde(rename = "participantID", skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<u8>,
    #[serde(rename = "eventID")]
    pub event_id: Uuid,
    #[serde(rename = "gameLocation", skip_serializing_if = "Option::is_none")]
    pub game_location: Option<GameLocation>,
}

#[derive(Debug, Clone)]
pub enum InboundCommand {
    Start(BattleStartPayload),
    MapDetails(MapDetailsPayload),
    WarMachineDestroyed(WarMachineDestroyedPayload),
    End(BattleEndPayload),
    AbilityCheckResponse(AbilityCheckResponse),
    Unknown(String),
}

#[derive(Debug)]
pub enum InboundFrame<'a> {
    Command(InboundCommand),
    /// Raw tick payload, type byte stripped
    Tick(&'a [u8]),
    /// Valid type the server does not consume
    Ignored(MessageType),
}

/// Decode one inbound frame
pub fn decode_frame(frame: &[u8]) -> Result<InboundFrame<'_>, ProtocolError> {
    let (&kind, body) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;

    match MessageType::try_from(kind)? {
        MessageType::Json => decode_command(body).map(InboundFrame::Command),
        MessageType::Tick => Ok(InboundFrame::Tick(body)),
        other => Ok(InboundFrame::Ignored(other)),
    }
}

fn decode_command(body: &[u8]) -> Result<InboundCommand, ProtocolError> {
    let msg: BattleMsg = serde_json::from_slice(body).map_err(ProtocolError::Envelope)?;

    if msg.payload.is_null() {
        return Err(ProtocolError::EmptyPayload(msg.battle_command));
    }

    let command = msg.battle_command;
    let payload = msg.payload;

    fn parse<T: for<'de> Deserialize<'de>>(
        command: &str,
        payload: serde_json::Value,
    ) -> Result<T, ProtocolError> {
        serde_json::from_value(payload).map_err(|source| ProtocolError::Payload {
            command: command.to_string(),
            source,
        })
    }

    Ok(match command.as_str() {
        commands::BATTLE_START => InboundCommand::Start(parse(&command, payload)?),
        commands::BATTLE_MAP_DETAILS => InboundCommand::MapDetails(parse(&command, payload)?),
        commands::BATTLE_WAR_MACHINE_DESTROYED => {
            InboundCommand::WarMachineDestroyed(parse(&command, payload)?)
        }
        commands::BATTLE_END => InboundCommand::End(parse(&command, payload)?),
        commands::BATTLE_ABILITY_CHECK_RESPONSE => {
            InboundCommand::AbilityCheckResponse(parse(&command, payload)?)
        }
        _ => InboundCommand::Unknown(command),
    })
}

/// Encode an outbound command as a `Json` frame payload
pub fn encode_command<T: Serialize>(command: &str, payload: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(256);
    out.push(MessageType::Json as u8);
    serde_json::to_writer(
        &mut out,
        &OutboundMsg {
            battle_command: command,
            payload,
        },
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_frame(value: serde_json::Value) -> Vec<u8> {
        let mut frame = vec![MessageType::Json as u8];
        frame.extend_from_slice(value.to_string().as_bytes());
        frame
    }

    #[test]
    fn test_decode_battle_start() {
        let battle_id = Uuid::new_v4();
        let frame = json_frame(serde_json::json!({
            "battleCommand": "BATTLE:START",
            "payload": {
                "battleID": battle_id,
                "clientBuildNo": "42",
                "warMachines": [{"hash": "abc", "participantID": 3}]
            }
        }));

        match decode_frame(&frame).unwrap() {
            InboundFrame::Command(InboundCommand::Start(payload)) => {
                assert_eq!(payload.battle_id, battle_id);
                assert_eq!(payload.war_machines[0].participant_id, 3);
                assert_eq!(payload.client_build_no.as_deref(), Some("42"));
            }
            other => panic!("Wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_destroyed() {
        let frame = json_frame(serde_json::json!({
            "battleCommand": "BATTLE:WAR_MACHINE_DESTROYED",
            "payload": {
                "battleID": Uuid::new_v4(),
                "destroyedWarMachineEvent": {
                    "destroyedWarMachineHash": "victim",
                    "killByWarMachineHash": "killer",
                    "relatedEventID": "evt",
                    "killedBy": "Killer Mech",
                    "damageHistory": [
                        {"amount": 120, "instigatorHash": "killer", "sourceHash": "gun", "sourceName": "Cannon"}
                    ]
                }
            }
        }));

        match decode_frame(&frame).unwrap() {
            InboundFrame::Command(InboundCommand::WarMachineDestroyed(payload)) => {
                assert_eq!(payload.event.destroyed_war_machine_hash, "victim");
                assert_eq!(payload.event.kill_by_war_machine_hash.as_deref(), Some("killer"));
                assert_eq!(payload.event.damage_history.len(), 1);
            }
            other => panic!("Wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_tick_passthrough() {
        let frame = vec![MessageType::Tick as u8, 1, 2, 3];
        match decode_frame(&frame).unwrap() {
            InboundFrame::Tick(body) => assert_eq!(body, &[1, 2, 3]),
            other => panic!("Wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode_frame(&[]), Err(ProtocolError::EmptyFrame)));
        assert!(matches!(
            decode_frame(&[42]),
            Err(ProtocolError::UnknownMessageType(42))
        ));
        assert!(matches!(
            decode_frame(b"\x00{not json"),
            Err(ProtocolError::Envelope(_))
        ));

        let empty = json_frame(serde_json::json!({"battleCommand": "BATTLE:END"}));
        assert!(matches!(decode_frame(&empty), Err(ProtocolError::EmptyPayload(_))));

        let bad = json_frame(serde_json::json!({"battleCommand": "BATTLE:END", "payload": {"battleID": 5}}));
        assert!(matches!(decode_frame(&bad), Err(ProtocolError::Payload { .. })));
    }

    #[test]
    fn test_unknown_command_is_not_an_error() {
        let frame = json_frame(serde_json::json!({"battleCommand": "BATTLE:WAR_MACHINE_PICKUP", "payload": {}}));
        assert!(matches!(
            decode_frame(&frame).unwrap(),
            InboundFrame::Command(InboundCommand::Unknown(cmd)) if cmd == "BATTLE:WAR_MACHINE_PICKUP"
        ));
    }

    #[test]
    fn test_encode_ability_event() {
        let event = GameAbilityEvent {
            is_triggered: true,
            game_client_ability_id: 8,
            war_machine_hash: Some("hash".into()),
            participant_id: Some(4),
            event_id: Uuid::nil(),
            game_location: Some(GameLocation::new(10, 20)),
        };
        let frame = encode_command(commands::BATTLE_ABILITY, &event).unwrap();
        assert_eq!(frame[0], MessageType::Json as u8);

        let value: serde_json::Value = serde_json::from_slice(&frame[1..]).unwrap();
        assert_eq!(value["battleCommand"], "BATTLE:ABILITY");
        assert_eq!(value["payload"]["gameClientAbilityID"], 8);
        assert_eq!(value["payload"]["gameLocation"]["x"], 10);
        assert_eq!(value["payload"]["participantID"], 4);
    }
}
