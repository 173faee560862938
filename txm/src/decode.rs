use cosmrs::cosmwasm::MsgExecuteContract;
use cosmrs::proto::cosmwasm::wasm::v1::MsgExecuteContract as ProtoMsgExecuteContract;
use cosmrs::proto::traits::Message as _;
use cosmrs::{AccountId, Any};

pub const EXECUTE_CONTRACT_TYPE_URL: &str = "/cosmwasm.wasm.v1.MsgExecuteContract";

#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed protobuf: {0}")]
    Protobuf(String),
    #[error("Invalid execute message: {0}")]
    InvalidMessage(String),
}

/// Reads the signing account out of a stored payload and wraps the payload
/// for inclusion in a transaction.
pub trait SenderDecoder: Send + Sync {
    fn decode_sender(&self, payload: &[u8]) -> Result<AccountId, DecodeError>;

    fn to_any(&self, payload: &[u8]) -> Any;
}

/// Payloads are protobuf encoded `cosmwasm.wasm.v1.MsgExecuteContract`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteContractDecoder;

impl SenderDecoder for ExecuteContractDecoder {
    fn decode_sender(&self, payload: &[u8]) -> Result<AccountId, DecodeError> {
        let proto = ProtoMsgExecuteContract::decode(payload)
            .map_err(|e| DecodeError::Protobuf(e.to_string()))?;
        let msg = MsgExecuteContract::try_from(proto)
            .map_err(|e| DecodeError::InvalidMessage(e.to_string()))?;
        Ok(msg.sender)
    }

    fn to_any(&self, payload: &[u8]) -> Any {
        Any {
            type_url: EXECUTE_CONTRACT_TYPE_URL.to_owned(),
            value: payload.to_vec(),
        }
    }
}
