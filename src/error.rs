//! パイプライン共通のエラー型
//!
//! GL / EGL の呼び出し失敗は「どの呼び出しが」「どのネイティブコードで」
//! 失敗したかを保持する。呼び出し側はスロット単位でエラーを処理できる
//! （あるスロットの失敗が他のスロットへ伝播してはならない）。

use thiserror::Error;

/// GL パイプラインのエラー
#[derive(Debug, Error)]
pub enum GlError {
    /// glutin 経由のコンテキスト / サーフェス操作の失敗
    #[error("{call} に失敗しました: {source}")]
    Context {
        call: &'static str,
        #[source]
        source: glutin::error::Error,
    },

    /// GL 呼び出しが glGetError でエラーを返した
    #[error("{call} が GL エラーを返しました: 0x{code:X}")]
    Gl { call: &'static str, code: u32 },

    /// EGL 拡張呼び出しが失敗した
    #[error("{call} が EGL エラーを返しました: 0x{code:X}")]
    Egl { call: &'static str, code: i32 },

    /// 適合する GL コンフィグが見つからない
    #[error("適合する GL コンフィグが見つかりません")]
    NoConfig,

    /// シェーダのコンパイル失敗（インフォログ付き）
    #[error("{stage} シェーダのコンパイルに失敗しました: {log}")]
    ShaderCompile { stage: &'static str, log: String },

    /// シェーダプログラムのリンク失敗
    #[error("シェーダプログラムのリンクに失敗しました: {log}")]
    ProgramLink { log: String },

    /// FBO が描画可能な状態にならなかった
    #[error("フレームバッファが不完全です: 0x{status:X}")]
    IncompleteFramebuffer { status: u32 },

    /// 必要な EGL / GL 拡張が利用できない
    #[error("{name} が利用できません")]
    MissingExtension { name: &'static str },

    /// DMA-BUF 記述子が不正、または非対応フォーマット
    #[error("バッファ記述子が不正です: {reason}")]
    InvalidBuffer { reason: String },

    /// 破棄済み・未設定のサーフェスへの描画要求
    #[error("出力サーフェスが未設定、または破棄済みです")]
    SurfaceGone,

    /// API の使い方の誤り（プログラミングエラー）
    #[error("不正な呼び出し: {reason}")]
    Misuse { reason: &'static str },

    /// 内部ロックが poisoned 状態（別スレッドの panic 後）
    #[error("パイプラインの内部ロックが poisoned 状態です")]
    Poisoned,
}

/// 直前の GL 呼び出しのエラーを確認する
///
/// `glGetError` が `GL_NO_ERROR` 以外を返したら、失敗した呼び出し名と
/// ネイティブコードを持つ [`GlError::Gl`] を返す。
pub fn check_gl(call: &'static str) -> Result<(), GlError> {
    let code = unsafe { gl::GetError() };
    if code == gl::NO_ERROR {
        Ok(())
    } else {
        Err(GlError::Gl { call, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gl_error_names_the_failing_call() {
        let e = GlError::Gl {
            call: "glTexParameteri",
            code: 0x0501,
        };
        let msg = e.to_string();
        assert!(msg.contains("glTexParameteri"));
        assert!(msg.contains("501"));
    }
}
