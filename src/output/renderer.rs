//! 出力レンダラ
//!
//! ちょうど 1 つの出力先（オンスクリーンのウィンドウ、またはオフスクリーンの
//! DMA-BUF）にバインドし、呼び出しごとにテクスチャ付きクアッドを 1 回描画する。
//!
//! ウィンドウサーフェスは初回描画時に遅延生成し、明示的に破棄されるまで
//! キャッシュして使い回す。フレームの途中で勝手に作り直すことはない。

use std::sync::Arc;

use glutin::surface::{Surface, WindowSurface};

use crate::context::{GlContext, GlTexture, TextureKind};
use crate::dmabuf::DmaBufFrame;
use crate::error::{check_gl, GlError};
use crate::output::{FrameSink, WindowTarget};
use crate::shader::PassThroughShader;
use crate::transform::TransformMatrix;

/// 1 つの出力先へテクスチャを描き込むレンダラ
pub struct OutputRenderer {
    context: Arc<GlContext>,
    /// オンスクリーン出力先。`None` ならオフスクリーン専用
    /// （描画先は呼び出しごとに DMA-BUF で供給される）
    window: Option<WindowTarget>,
    /// 遅延生成されるウィンドウサーフェス
    surface: Option<Surface<WindowSurface>>,
    shader: PassThroughShader,
}

// SAFETY: GL / EGL 操作はすべてパイプラインのロック内で直列化される。
// EGL サーフェスとコンテキストは同時に current にしなければ
// スレッドをまたいで使用できる。
unsafe impl Send for OutputRenderer {}

impl OutputRenderer {
    /// ネイティブウィンドウへ描画するレンダラを作る
    ///
    /// サーフェスはここでは作らない（初回描画時に遅延生成）。
    pub fn with_window(context: Arc<GlContext>, target: WindowTarget) -> Self {
        OutputRenderer {
            context,
            window: Some(target),
            surface: None,
            shader: PassThroughShader::new(),
        }
    }

    /// オフスクリーン専用（DMA-BUF 書き出し用）のレンダラを作る
    pub fn offscreen(context: Arc<GlContext>) -> Self {
        OutputRenderer {
            context,
            window: None,
            surface: None,
            shader: PassThroughShader::new(),
        }
    }

    /// ウィンドウサーフェスを必要なら生成する
    ///
    /// 生成は attach から detach までの間に最大 1 回。以降の呼び出しは
    /// 同じサーフェスを返す冪等操作。
    fn ensure_surface(&mut self) -> Result<(), GlError> {
        if self.surface.is_some() {
            return Ok(());
        }
        let target = self.window.as_ref().ok_or(GlError::Misuse {
            reason: "オフスクリーン専用レンダラにウィンドウサーフェスは作れない",
        })?;
        log::info!(
            "ウィンドウサーフェスを作成します: {}x{}",
            target.width,
            target.height
        );
        let surface =
            self.context
                .create_window_surface(target.handle, target.width, target.height)?;
        self.surface = Some(surface);
        Ok(())
    }

    /// テクスチャをウィンドウサーフェスへ描画して提示する
    ///
    /// 1. サーフェスを取得（なければ生成）
    /// 2. コンテキストを current に
    /// 3. ビューポート設定・ブレンド無効・黒クリア（フレームは常に不透明）
    /// 4. パススルーシェーダで描画
    /// 5. スワップして提示
    pub fn render_to_surface(
        &mut self,
        texture: &GlTexture,
        transform: &TransformMatrix,
    ) -> Result<(), GlError> {
        self.ensure_surface()?;
        let (width, height) = match self.window.as_ref() {
            Some(t) => (t.width, t.height),
            None => return Err(GlError::SurfaceGone),
        };
        let surface = self.surface.as_ref().ok_or(GlError::SurfaceGone)?;

        self.context.make_current(surface)?;
        unsafe {
            gl::Viewport(0, 0, width as i32, height as i32);
            gl::Disable(gl::BLEND);
            gl::ClearColor(0.0, 0.0, 0.0, 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }
        check_gl("glClear")?;

        self.shader.draw(texture, transform)?;
        self.context.swap_buffers(surface)
    }

    /// テクスチャを DMA-BUF へ描画する（提示なし）
    ///
    /// バッファを EGLImage として取り込み、それをストレージに持つ
    /// 一時テクスチャへウィンドウ経路と同一の描画を行い、glFlush で
    /// 完了させる。取り込み（イメージハンドル）はこの呼び出しの中で
    /// 解放するが、バッファ本体の所有権には触れない。
    pub fn render_to_dma_buf(
        &mut self,
        texture: &GlTexture,
        frame: &DmaBufFrame,
        transform: &TransformMatrix,
    ) -> Result<(), GlError> {
        self.context.make_current_offscreen()?;

        let image = self.context.import_dma_buf(frame)?;
        let target_tex =
            self.context
                .create_texture(TextureKind::Texture2D, frame.width, frame.height)?;

        unsafe {
            gl::BindTexture(target_tex.target(), target_tex.id);
        }
        let result = image
            .bind_to_texture(target_tex.target())
            .and_then(|_| self.draw_into_texture(&target_tex, texture, transform));

        // 一時リソースを解放。EGLImage の Drop で OS 側の参照も返す
        self.context.delete_texture(&target_tex);
        drop(image);

        result
    }

    /// FBO 経由で `target_tex` に 1 フレーム描画する
    fn draw_into_texture(
        &self,
        target_tex: &GlTexture,
        source: &GlTexture,
        transform: &TransformMatrix,
    ) -> Result<(), GlError> {
        let mut fbo: u32 = 0;
        unsafe {
            gl::GenFramebuffers(1, &mut fbo);
            gl::BindFramebuffer(gl::FRAMEBUFFER, fbo);
            gl::FramebufferTexture2D(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                target_tex.id,
                0,
            );
            let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
            if status != gl::FRAMEBUFFER_COMPLETE {
                gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
                gl::DeleteFramebuffers(1, &fbo);
                return Err(GlError::IncompleteFramebuffer { status });
            }
        }

        let result = (|| {
            unsafe {
                gl::Viewport(0, 0, target_tex.width as i32, target_tex.height as i32);
                gl::Disable(gl::BLEND);
                gl::ClearColor(0.0, 0.0, 0.0, 1.0);
                gl::Clear(gl::COLOR_BUFFER_BIT);
            }
            self.shader.draw(source, transform)?;
            // オフスクリーンなのでスワップはなし。提出だけ行う
            unsafe {
                gl::Flush();
            }
            check_gl("glFlush")
        })();

        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::DeleteFramebuffers(1, &fbo);
        }
        result
    }

    /// キャッシュ済みサーフェスとシェーダリソースを破棄する
    ///
    /// コンテキストを current にしてから呼ぶこと。2 回呼んでも安全。
    pub fn destroy(&mut self) {
        if self.surface.take().is_some() {
            log::info!("ウィンドウサーフェスを破棄します");
        }
        self.shader.destroy();
    }
}

impl FrameSink for OutputRenderer {
    fn render(&mut self, texture: &GlTexture, transform: &TransformMatrix) -> Result<(), GlError> {
        self.render_to_surface(texture, transform)
    }

    fn destroy(&mut self) {
        OutputRenderer::destroy(self);
    }
}

impl Drop for OutputRenderer {
    fn drop(&mut self) {
        // 通常は destroy 済み。ここに来た場合もサーフェス自体の解放は
        // glutin の Drop が行う
        self.destroy();
    }
}
