//! フレーム出力先モジュール
//!
//! パイプラインが配信する 3 つの固定スロット（プレビュー / 録画 / 解析）と、
//! スロットに差し込む出力先の共通インターフェースを定義する。

pub mod renderer;

pub use renderer::OutputRenderer;

use raw_window_handle::RawWindowHandle;

use crate::context::GlTexture;
use crate::error::GlError;
use crate::transform::TransformMatrix;

/// 出力スロット
///
/// 各スロットには同時に最大 1 つの出力先しかバインドできない。
/// バインドは常に置き換え（last-writer-wins）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlot {
    /// 画面プレビュー
    Preview,
    /// 録画エンコーダの入力サーフェス
    Recording,
    /// フレーム解析コールバック
    Analysis,
}

impl OutputSlot {
    /// 毎フレームの描画順（固定）
    pub const ALL: [OutputSlot; 3] = [
        OutputSlot::Preview,
        OutputSlot::Recording,
        OutputSlot::Analysis,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            OutputSlot::Preview => 0,
            OutputSlot::Recording => 1,
            OutputSlot::Analysis => 2,
        }
    }
}

/// ネイティブウィンドウの出力先指定
///
/// raw ハンドルはサイズを持たないため、ピクセル寸法を併せて渡す。
#[derive(Debug, Clone, Copy)]
pub struct WindowTarget {
    pub handle: RawWindowHandle,
    pub width: u32,
    pub height: u32,
}

// SAFETY: ハンドルはパイプラインのロック内でのみ使用する。
// ウィンドウ本体の寿命は呼び出し側が保証する（detach まで有効に保つ）。
unsafe impl Send for WindowTarget {}

impl WindowTarget {
    pub fn new(handle: RawWindowHandle, width: u32, height: u32) -> Self {
        WindowTarget {
            handle,
            width,
            height,
        }
    }
}

/// スロットに差し込むフレーム出力先
///
/// 本番実装は [`OutputRenderer`]。テストや特殊な消費者は独自実装を
/// [`FramePipeline::attach_sink`](crate::pipeline::FramePipeline::attach_sink)
/// で差し込める。`render` のエラーはそのスロットだけの失敗として扱われ、
/// 他のスロットへは伝播しない。
pub trait FrameSink: Send {
    /// 共有入力テクスチャをこの出力先へ 1 フレームぶん描画する
    fn render(&mut self, texture: &GlTexture, transform: &TransformMatrix)
        -> Result<(), GlError>;

    /// 保持しているネイティブリソースを解放する（2 回呼んでも安全）
    fn destroy(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_order_is_preview_recording_analysis() {
        assert_eq!(
            OutputSlot::ALL,
            [
                OutputSlot::Preview,
                OutputSlot::Recording,
                OutputSlot::Analysis
            ]
        );
        for (i, slot) in OutputSlot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), i);
        }
    }
}
