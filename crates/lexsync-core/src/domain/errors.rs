//! Errors - エラー型と分類
//!
//! # 分類（ErrorKind）
//! - Transient: 一回の試行の失敗（ネットワーク・デコード）。maxRetries までローカルで再試行
//! - Cancelled: 新しい ticket に置き換えられた。ユーザには表示しない
//! - Terminal: 再試行を使い切った。手動リトライ可能なエラーとして表示
//! - Conflict: version 不一致による書き込み拒否。権威ある再読み込みを促す
//! - Unauthorized: 資格情報が無効。破棄してログイン境界へ
//! - Permanent: その他の恒久的なエラー
//!
//! タイムアウト（PendingTimeout）はエラーではありません。遅れて届く結果を待ち続けます。

use thiserror::Error;

use super::entity::EntityType;
use super::record::Version;
use super::ticket::TicketId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Cancelled,
    Terminal,
    Conflict,
    Unauthorized,
    Permanent,
}

/// Failure of a single call to an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("credential rejected")]
    Unauthorized,

    #[error("no stored credential")]
    MissingCredential,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    pub const CONFLICT: u16 = 409;
    pub const UNAUTHORIZED: u16 = 401;

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Network(_) | TransportError::Decode(_) | TransportError::Timeout(_) => {
                ErrorKind::Transient
            }
            TransportError::Status { status, .. } if *status == Self::CONFLICT => {
                ErrorKind::Conflict
            }
            TransportError::Status { status, .. } if *status >= 500 => ErrorKind::Transient,
            TransportError::Status { .. } => ErrorKind::Permanent,
            TransportError::Unauthorized | TransportError::MissingCredential => {
                ErrorKind::Unauthorized
            }
            TransportError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

/// Retries exhausted with no commit. Manually retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{resource} could not be loaded after {attempts} attempts: {last_error}")]
pub struct TerminalLoadError {
    pub resource: String,
    pub attempts: u32,
    pub last_error: TransportError,
}

/// Result of a loader invocation that did not commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Superseded by a newer ticket. Callers drop this silently.
    #[error("{0} was superseded")]
    Cancelled(TicketId),

    #[error(transparent)]
    Terminal(#[from] TerminalLoadError),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Cancelled(_) => ErrorKind::Cancelled,
            LoadError::Terminal(_) => ErrorKind::Terminal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled(_))
    }
}

/// Write rejected because the submitted version is not the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} {id} was changed by someone else (submitted {submitted})")]
pub struct ConflictError {
    pub entity: EntityType,
    pub id: String,
    pub submitted: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("credential rejected")]
    Unauthorized,

    #[error("{entity} write rejected with HTTP {status}: {message}")]
    Rejected {
        entity: EntityType,
        status: u16,
        message: String,
    },

    #[error("transport failure: {0}")]
    Transport(TransportError),

    #[error("malformed record: {0}")]
    Decode(String),
}

impl WriteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WriteError::Conflict(_) => ErrorKind::Conflict,
            WriteError::Unauthorized => ErrorKind::Unauthorized,
            WriteError::Rejected { .. } | WriteError::Decode(_) => ErrorKind::Permanent,
            WriteError::Transport(err) => err.kind(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, WriteError::Conflict(_))
    }
}
