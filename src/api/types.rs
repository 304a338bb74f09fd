use serde::Serialize;

use crate::error::{ErrorKind, WalletError};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ApiResponse<T: Serialize> {
    Ok {
        success: bool,
        data: T,
    },
    #[serde(rename_all = "camelCase")]
    Err {
        success: bool,
        error_kind: ErrorKind,
        message: String,
    },
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse::Ok { success: true, data }
    }

    /// Error messages are the fixed templates of [`WalletError`]; nothing
    /// from the failing input is echoed back.
    pub fn error(error: &WalletError) -> Self {
        ApiResponse::Err {
            success: false,
            error_kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Ok { .. })
    }
}

impl<T: Serialize> From<Result<T, WalletError>> for ApiResponse<T> {
    fn from(result: Result<T, WalletError>) -> Self {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(error) => {
                log::debug!("Operation failed: {:?}", error.kind());
                ApiResponse::error(&error)
            }
        }
    }
}
