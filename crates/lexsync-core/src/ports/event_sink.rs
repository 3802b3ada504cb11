//! EventSink port - 変更通知の受け口
//!
//! ChangeChannel の転送タスクと FallbackPoller が ChangeEvent をここへ流します。
//! 主な実装は ChangeAggregator です。

use crate::domain::ChangeEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChangeEvent);
}
