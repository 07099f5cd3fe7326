pub mod rcon;

use std::time::Duration;
use thiserror::Error;

/// 원격 세션 오류 타입
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Authentication failed: invalid password")]
    AuthFailed,

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("No response within {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AuthFailed => "RCON_AUTH_FAILED",
            Self::ConnectFailed(_) => "RCON_CONNECT_FAILED",
            Self::ProtocolError(_) => "RCON_PROTOCOL_ERROR",
            Self::Timeout(_) => "RCON_TIMEOUT",
        }
    }
}
