use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PageError {
    #[error("Not enough space in page")]
    InsufficientSpace,
    #[error("Record not found")]
    RecordNotFound,
    #[error("Invalid record ID")]
    InvalidRecordId,
    #[error("Records must not be empty")]
    EmptyRecord,
    #[error("Record of {0} bytes can never fit in a page")]
    RecordTooLarge(usize),
}
