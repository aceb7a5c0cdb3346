use crate::types::RegisterAddress;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Register range out of bounds: start {start}, count {count}")]
    AddressOutOfRange { start: RegisterAddress, count: usize },

    #[error("Base address {0} leaves no room for a status/error/result block")]
    BlockOutOfRange(RegisterAddress),
}
