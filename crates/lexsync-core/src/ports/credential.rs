//! CredentialStore port - bearer credential の保存先
//!
//! 資格情報の発行（ログイン）はこのクレートの範囲外です。ここでは読み出しと、
//! 401 を受けたときの破棄だけを扱います。

/// CredentialStore は bearer credential を保持
///
/// # 設計原則
/// - 資格情報がないことはエラーではない（未認証という正当な状態）
/// - 401 を受けたら `discard` で破棄する
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;

    fn store(&self, token: String);

    fn discard(&self);
}
