//! フレーム配信パイプライン
//!
//! ## 実行モデル
//! フレーム供給（キャプチャコールバック側）と出力の付け外し（UI / 録画
//! セッション側）は別スレッドから来る。共有状態（スロット表とレンダラ）は
//! 1 つの Mutex で直列化し、フレーム供給はロックを 1 フレームにつき 1 回
//! 取得してアタッチ済みスロットへ順に描画する。
//!
//! 「current」なコンテキストはスレッド単位のプロセスグローバル状態なので、
//! 同一フレーム内の複数出力を並列化してはならない。すべての描画は
//! フレーム供給側スレッドで逐次行う。
//!
//! 破棄の順序は呼び出し側の責任: キャプチャソースがフレーム供給を止めた
//! ことを保証してからパイプラインを破棄すること（描画中の destructor 競合は
//! 設計上存在しない）。

use std::sync::{Arc, Mutex, MutexGuard};

use raw_window_handle::RawDisplayHandle;

use crate::context::{GlContext, GlTexture, TextureKind};
use crate::dmabuf::DmaBufFrame;
use crate::error::{check_gl, GlError};
use crate::output::{FrameSink, OutputRenderer, OutputSlot, WindowTarget};
use crate::transform::TransformMatrix;

// ─── スロット表 ─────────────────────────────────────────────────────────────

/// OutputSlot → 出力先の対応表
///
/// スロットごとに独立した `Detached -> Attached -> Detached` の状態遷移を
/// 管理する。パイプライン全体の started/stopped のような状態は持たない。
pub struct FrameRouter {
    slots: [Option<Box<dyn FrameSink>>; 3],
}

impl FrameRouter {
    pub fn new() -> Self {
        FrameRouter {
            slots: [None, None, None],
        }
    }

    /// スロットへ出力先をバインドする（置き換え）
    ///
    /// 既存の出力先があれば、新しい出力先を登録する前に破棄する。
    pub fn attach(&mut self, slot: OutputSlot, sink: Box<dyn FrameSink>) {
        if let Some(mut old) = self.slots[slot.index()].take() {
            log::info!("{:?} の既存の出力先を破棄して置き換えます", slot);
            old.destroy();
        }
        self.slots[slot.index()] = Some(sink);
        log::info!("{:?} に出力先をバインドしました", slot);
    }

    /// スロットの出力先を切り離して破棄する
    ///
    /// 未バインドのスロットに対しては何もしない（冪等）。
    pub fn detach(&mut self, slot: OutputSlot) {
        if let Some(mut old) = self.slots[slot.index()].take() {
            old.destroy();
            log::info!("{:?} の出力先を切り離しました", slot);
        }
    }

    /// スロットに出力先がバインドされているか
    pub fn is_attached(&self, slot: OutputSlot) -> bool {
        self.slots[slot.index()].is_some()
    }

    /// バインド済みスロット数
    pub fn attached_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// アタッチ済みの全スロットへ 1 フレーム配信する
    ///
    /// 固定順（プレビュー → 録画 → 解析）で描画する。あるスロットの失敗は
    /// ログに記録してそのスロットだけを切り離し、残りのスロットへの配信は
    /// 続行する。壊れた出力が他の出力を止めてはならない。
    ///
    /// 戻り値は描画に成功したスロット数。0 スロットへの配信は有効な no-op。
    pub fn dispatch(&mut self, texture: &GlTexture, transform: &TransformMatrix) -> usize {
        let mut rendered = 0;
        for slot in OutputSlot::ALL {
            let idx = slot.index();
            let result = match self.slots[idx].as_mut() {
                Some(sink) => sink.render(texture, transform),
                None => continue,
            };
            match result {
                Ok(()) => rendered += 1,
                Err(e) => {
                    // このスロットのみ失敗扱い。再アタッチで復帰できる
                    log::error!("{:?} 出力の描画に失敗したため切り離します: {}", slot, e);
                    if let Some(mut broken) = self.slots[idx].take() {
                        broken.destroy();
                    }
                }
            }
        }
        rendered
    }

    /// 全スロットを切り離す
    pub fn clear(&mut self) {
        for slot in OutputSlot::ALL {
            self.detach(slot);
        }
    }
}

impl Default for FrameRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ─── パイプライン本体 ───────────────────────────────────────────────────────

struct PipelineInner {
    context: Arc<GlContext>,
    router: FrameRouter,
    /// 解析向け「書き出し専用」モード用のオフスクリーンレンダラ
    exporter: OutputRenderer,
}

/// フレーム配信パイプライン
///
/// 共有レンダリングコンテキストと固定サイズの入力テクスチャを所有し、
/// 毎フレーム、入力テクスチャをアタッチ済みの各出力へ描画する。
/// 入力テクスチャの id は構築後いっさい変わらない。
///
/// キャプチャソースは入力テクスチャへフレームを書き込んだうえで
/// [`on_frame_available`](FramePipeline::on_frame_available) を呼ぶ。
pub struct FramePipeline {
    inner: Mutex<PipelineInner>,
    input: GlTexture,
}

impl FramePipeline {
    /// パイプラインを構築する
    ///
    /// 入力テクスチャを `input_kind` / `width` x `height` で確保する。
    /// カメラデコーダが直接書き込む場合は [`TextureKind::ExternalOes`]、
    /// CPU からアップロードする場合は [`TextureKind::Texture2D`] を使う。
    pub fn new(
        display: RawDisplayHandle,
        width: u32,
        height: u32,
        input_kind: TextureKind,
    ) -> Result<Self, GlError> {
        let context = Arc::new(GlContext::new(display)?);
        context.make_current_offscreen()?;
        let input = context.create_texture(input_kind, width, height)?;

        log::info!(
            "フレームパイプラインを作成しました: {}x{} 入力テクスチャ id={}",
            width,
            height,
            input.id
        );

        Ok(FramePipeline {
            inner: Mutex::new(PipelineInner {
                context: Arc::clone(&context),
                router: FrameRouter::new(),
                exporter: OutputRenderer::offscreen(context),
            }),
            input,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, PipelineInner>, GlError> {
        self.inner.lock().map_err(|_| GlError::Poisoned)
    }

    /// ロックを取得し、コンテキストをオフスクリーンで current にする
    ///
    /// GL リソースの生成・破棄を伴う操作はすべてここを通す。出力の
    /// 付け外しは既存出力の破棄（glDelete 系とサーフェスの解放）を含む
    /// ため、配信と同じく current なコンテキストを前提に実行する。
    fn lock_current(&self) -> Result<MutexGuard<'_, PipelineInner>, GlError> {
        let inner = self.lock()?;
        inner.context.make_current_offscreen()?;
        Ok(inner)
    }

    /// 入力テクスチャのハンドル（id は構築後不変）
    pub fn input_texture(&self) -> GlTexture {
        self.input
    }

    // ─── 出力の付け外し ─────────────────────────────────────────────────────

    /// スロットへネイティブウィンドウをバインドする
    ///
    /// 既存のバインドがあれば先に破棄する（サーフェスを含む）。フレーム供給
    /// スレッドとは別のスレッドから呼んでよい。他スロットの描画中フレームを
    /// 壊すことはない。
    pub fn set_output(&self, slot: OutputSlot, target: WindowTarget) -> Result<(), GlError> {
        let mut inner = self.lock_current()?;
        let renderer = OutputRenderer::with_window(Arc::clone(&inner.context), target);
        inner.router.attach(slot, Box::new(renderer));
        Ok(())
    }

    /// スロットへ任意の [`FrameSink`] 実装をバインドする
    ///
    /// GPU を伴わない消費者やテスト用のフェイクを差し込むための口。
    pub fn attach_sink(&self, slot: OutputSlot, sink: Box<dyn FrameSink>) -> Result<(), GlError> {
        let mut inner = self.lock_current()?;
        inner.router.attach(slot, sink);
        Ok(())
    }

    /// スロットの出力先を切り離す（冪等）
    ///
    /// 以降のフレームはこのスロットを単にスキップする。
    pub fn remove_output(&self, slot: OutputSlot) -> Result<(), GlError> {
        let mut inner = self.lock_current()?;
        inner.router.detach(slot);
        Ok(())
    }

    /// スロットに出力先がバインドされているか
    pub fn is_attached(&self, slot: OutputSlot) -> bool {
        self.lock().map(|i| i.router.is_attached(slot)).unwrap_or(false)
    }

    // ─── フレーム配信 ───────────────────────────────────────────────────────

    /// フレーム更新の直前処理
    ///
    /// コンテキストを current にして入力テクスチャをバインドする。
    /// キャプチャソースが「新しい画像が利用可能」シグナルで入力テクスチャを
    /// 更新する前に呼ぶ。
    pub fn on_before_frame(&self) -> Result<(), GlError> {
        let _inner = self.lock_current()?;
        unsafe {
            gl::BindTexture(self.input.target(), self.input.id);
        }
        check_gl("glBindTexture")
    }

    /// 新しいフレームをアタッチ済みの全出力へ配信する
    ///
    /// `transform` はセンサーの向きから導出した column-major 行列。
    /// 呼び出しスレッドをブロックして全出力を逐次描画する。失敗した
    /// スロットはログに記録して切り離し、残りへの配信は続行する。
    /// 戻り値は描画に成功したスロット数（0 出力は有効な no-op）。
    pub fn on_frame_available(&self, transform: &TransformMatrix) -> Result<usize, GlError> {
        let mut inner = self.lock()?;
        Ok(inner.router.dispatch(&self.input, transform))
    }

    /// 現在のフレームを呼び出し側の DMA-BUF へ書き出す（解析向け）
    ///
    /// 画面提示を伴わない「書き出し専用」経路。戻った時点で描画は flush
    /// 済みで、呼び出し側はバッファを自由にしてよい（解析ブリッジへ渡す等）。
    /// バッファはこの呼び出しの間、呼び出し側が有効に保つこと。
    pub fn export_frame(
        &self,
        frame: &DmaBufFrame,
        transform: &TransformMatrix,
    ) -> Result<(), GlError> {
        let mut inner = self.lock()?;
        let input = self.input;
        inner.exporter.render_to_dma_buf(&input, frame, transform)
    }

    /// RGBA8 ピクセルを入力テクスチャへアップロードする
    ///
    /// 合成テストパターンなど CPU 供給のソース用。入力が
    /// [`TextureKind::Texture2D`] のパイプラインでのみ使える。
    pub fn write_input_frame(&self, rgba: &[u8]) -> Result<(), GlError> {
        if self.input.kind != TextureKind::Texture2D {
            return Err(GlError::Misuse {
                reason: "CPU アップロードは Texture2D 入力のパイプラインのみ",
            });
        }
        let expected = expected_frame_len(&self.input);
        if rgba.len() != expected {
            return Err(GlError::InvalidBuffer {
                reason: format!(
                    "ピクセル長が不一致: {} (期待値 {})",
                    rgba.len(),
                    expected
                ),
            });
        }

        let _inner = self.lock_current()?;
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, self.input.id);
            gl::TexSubImage2D(
                gl::TEXTURE_2D,
                0,
                0,
                0,
                self.input.width as i32,
                self.input.height as i32,
                gl::RGBA,
                gl::UNSIGNED_BYTE,
                rgba.as_ptr().cast(),
            );
        }
        check_gl("glTexSubImage2D")
    }
}

/// RGBA8 フレームの期待バイト長（usize で計算。u32 の積は溢れうる）
fn expected_frame_len(texture: &GlTexture) -> usize {
    texture.width as usize * texture.height as usize * 4
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        // クリーンアップ（順序を守る）:
        // 1. コンテキストを current に
        // 2. 全出力とそのサーフェスを破棄
        // 3. 書き出し用レンダラを破棄
        // 4. 入力テクスチャを解放（コンテキスト自体は Arc の解放で消える)
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        log::info!("フレームパイプラインを破棄します");
        if let Err(e) = inner.context.make_current_offscreen() {
            log::warn!("破棄時の make current に失敗: {}", e);
        }
        inner.router.clear();
        inner.exporter.destroy();
        inner.context.delete_texture(&self.input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// 描画呼び出しを数えるだけのフェイク出力先
    struct CountingSink {
        renders: Arc<AtomicUsize>,
        destroyed: Arc<AtomicBool>,
        fail: bool,
    }

    impl FrameSink for CountingSink {
        fn render(
            &mut self,
            _texture: &GlTexture,
            _transform: &TransformMatrix,
        ) -> Result<(), GlError> {
            if self.fail {
                return Err(GlError::SurfaceGone);
            }
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn destroy(&mut self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    fn sink(fail: bool) -> (Box<CountingSink>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let renders = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(AtomicBool::new(false));
        (
            Box::new(CountingSink {
                renders: Arc::clone(&renders),
                destroyed: Arc::clone(&destroyed),
                fail,
            }),
            renders,
            destroyed,
        )
    }

    fn dummy_texture() -> GlTexture {
        GlTexture {
            kind: TextureKind::ExternalOes,
            id: 7,
            width: 1920,
            height: 1080,
        }
    }

    #[test]
    fn frame_len_does_not_overflow_for_large_textures() {
        let t = GlTexture {
            kind: TextureKind::Texture2D,
            id: 1,
            width: 65_536,
            height: 65_536,
        };
        // u32 の積なら 2^34 で溢れて debug ビルドが panic する大きさ
        assert_eq!(expected_frame_len(&t), 65_536usize * 65_536 * 4);
    }

    #[test]
    fn attach_replaces_and_destroys_previous_sink() {
        let mut router = FrameRouter::new();
        let (a, a_renders, a_destroyed) = sink(false);
        let (b, b_renders, _) = sink(false);

        router.attach(OutputSlot::Preview, a);
        router.attach(OutputSlot::Preview, b);
        assert!(a_destroyed.load(Ordering::SeqCst));

        router.dispatch(&dummy_texture(), &TransformMatrix::IDENTITY);
        assert_eq!(a_renders.load(Ordering::SeqCst), 0);
        assert_eq!(b_renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_twice_is_a_noop() {
        let mut router = FrameRouter::new();
        let (a, _, a_destroyed) = sink(false);
        router.attach(OutputSlot::Recording, a);
        router.detach(OutputSlot::Recording);
        assert!(a_destroyed.load(Ordering::SeqCst));
        // 2 回目は何も起きない
        router.detach(OutputSlot::Recording);
        assert!(!router.is_attached(OutputSlot::Recording));
    }

    #[test]
    fn dispatch_with_no_outputs_is_valid() {
        let mut router = FrameRouter::new();
        assert_eq!(
            router.dispatch(&dummy_texture(), &TransformMatrix::IDENTITY),
            0
        );
    }

    #[test]
    fn failing_slot_is_detached_but_others_still_render() {
        let mut router = FrameRouter::new();
        let (broken, _, broken_destroyed) = sink(true);
        let (rec, rec_renders, _) = sink(false);
        let (ana, ana_renders, _) = sink(false);

        router.attach(OutputSlot::Preview, broken);
        router.attach(OutputSlot::Recording, rec);
        router.attach(OutputSlot::Analysis, ana);

        // 同一フレーム内で残りのスロットへも配信される
        let rendered = router.dispatch(&dummy_texture(), &TransformMatrix::IDENTITY);
        assert_eq!(rendered, 2);
        assert_eq!(rec_renders.load(Ordering::SeqCst), 1);
        assert_eq!(ana_renders.load(Ordering::SeqCst), 1);

        // 失敗したスロットは破棄・切り離し済み（再アタッチで復帰する設計）
        assert!(broken_destroyed.load(Ordering::SeqCst));
        assert!(!router.is_attached(OutputSlot::Preview));
        assert_eq!(router.attached_count(), 2);
    }
}
