use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Hex error: {0}")]
    HexError(#[from] hex::FromHexError),
    #[error("Too much data, expected {expected}, got {got}")]
    TooMuchData { expected: usize, got: usize },
    #[error("Not enough data, expected {expected}, got {got}")]
    InsufficientData { expected: usize, got: usize },
    #[error("Invalid padding flag {0:#04x}")]
    InvalidPaddingFlag(u8),
    #[error("Batch declares {got} transactions, at most {max} are supported")]
    TooManyTransactions { got: usize, max: usize },
    #[error(
        "Viewing key payload has {got} bytes, {expected} bytes expected for {non_padding} non-padding transactions"
    )]
    InvalidViewingKeysLength {
        non_padding: usize,
        expected: usize,
        got: usize,
    },
    #[error("Value of `{field}` does not fit into 64 bits")]
    ValueOutOfRange { field: &'static str },
}
