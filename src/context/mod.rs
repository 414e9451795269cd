//! 共有 OpenGL コンテキストの管理
//!
//! ## 実装方針
//! パイプライン全体で 1 つの EGL コンテキストを共有し、描画先の切り替えは
//! すべて `make_current` 系メソッドに集約する。「current」はスレッド単位の
//! プロセスグローバル状態なので、呼び出しは必ず 1 つの排他境界
//! （[`FramePipeline`](crate::pipeline::FramePipeline) のロック）を通すこと。
//!
//! オフスクリーン作業用に 1x1 の pbuffer サーフェスを構築時に 1 つ作り、
//! 提示先サーフェスを伴わない操作（テクスチャ生成、DMA-BUF への描画）は
//! それを current にして行う。

mod egl_image;
mod texture;

pub use egl_image::EglImage;
pub use texture::{gl_ext, GlTexture, TextureKind};

use std::ffi::{c_void, CString};
use std::num::NonZeroU32;

use glutin::config::{Config, ConfigTemplateBuilder};
use glutin::context::{ContextApi, ContextAttributesBuilder, PossiblyCurrentContext, Version};
use glutin::display::{AsRawDisplay, Display, DisplayApiPreference, RawDisplay};
use glutin::prelude::*;
use glutin::surface::{PbufferSurface, Surface, SurfaceAttributesBuilder, WindowSurface};
use once_cell::sync::OnceCell;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::dmabuf::DmaBufFrame;
use crate::error::{check_gl, GlError};
use egl_image::EglImageFns;

/// 共有レンダリングコンテキスト
///
/// ディスプレイ接続・GL コンフィグ・EGL コンテキストを所有する。
/// 描画やテクスチャ操作の前に必ず `make_current` / `make_current_offscreen`
/// を呼ぶこと。呼ばずに GL を叩くのはプログラミングエラー。
pub struct GlContext {
    display: Display,
    config: Config,
    context: PossiblyCurrentContext,
    /// オフスクリーン作業用の 1x1 pbuffer
    pbuffer: Surface<PbufferSurface>,
    /// 実行時に解決する EGL 拡張関数（初回の DMA-BUF 取り込みで初期化）
    egl_fns: OnceCell<EglImageFns>,
}

// SAFETY: コンテキストとサーフェスへのアクセスはすべて FramePipeline の
// 単一ロックで直列化される。EGL はコンテキストを別スレッドへ再バインド
// することを許容する（同時に current にしなければよい）。
unsafe impl Send for GlContext {}
unsafe impl Sync for GlContext {}

impl GlContext {
    /// ディスプレイ接続から共有コンテキストを構築する
    ///
    /// OpenGL ES 3.0 のコンテキストを作成し、GL 関数ポインタをロードする。
    /// 失敗した場合は失敗した呼び出し名とネイティブエラーを報告する。
    pub fn new(raw_display: RawDisplayHandle) -> Result<Self, GlError> {
        let display = unsafe { Display::new(raw_display, DisplayApiPreference::Egl) }.map_err(
            |source| GlError::Context {
                call: "Display::new",
                source,
            },
        )?;

        // GL コンフィグを選択（RGBA8888）
        let template = ConfigTemplateBuilder::new().with_alpha_size(8).build();
        let config = unsafe {
            display
                .find_configs(template)
                .map_err(|source| GlError::Context {
                    call: "eglChooseConfig",
                    source,
                })?
                .reduce(|a, b| if b.num_samples() > a.num_samples() { b } else { a })
                .ok_or(GlError::NoConfig)?
        };

        let ctx_attrs = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::Gles(Some(Version::new(3, 0))))
            .build(None);
        let not_current =
            unsafe { display.create_context(&config, &ctx_attrs) }.map_err(|source| {
                GlError::Context {
                    call: "eglCreateContext",
                    source,
                }
            })?;

        // オフスクリーン作業用 pbuffer（1x1 で十分）
        let pbuffer_attrs =
            SurfaceAttributesBuilder::<PbufferSurface>::new().build(NonZeroU32::MIN, NonZeroU32::MIN);
        let pbuffer = unsafe { display.create_pbuffer_surface(&config, &pbuffer_attrs) }.map_err(
            |source| GlError::Context {
                call: "eglCreatePbufferSurface",
                source,
            },
        )?;

        let context = not_current
            .make_current(&pbuffer)
            .map_err(|source| GlError::Context {
                call: "eglMakeCurrent",
                source,
            })?;

        // GL 関数ポインタをロード
        gl::load_with(|name| {
            display
                .get_proc_address(&CString::new(name).unwrap())
                .cast()
        });

        log::info!("GL コンテキストを作成しました (GLES 3.0 / EGL)");

        Ok(GlContext {
            display,
            config,
            context,
            pbuffer,
            egl_fns: OnceCell::new(),
        })
    }

    /// コンテキストを指定サーフェスに対して current にする
    pub fn make_current(&self, surface: &Surface<WindowSurface>) -> Result<(), GlError> {
        self.context
            .make_current(surface)
            .map_err(|source| GlError::Context {
                call: "eglMakeCurrent",
                source,
            })
    }

    /// 提示先なしのオフスクリーンモードで current にする
    pub fn make_current_offscreen(&self) -> Result<(), GlError> {
        self.context
            .make_current(&self.pbuffer)
            .map_err(|source| GlError::Context {
                call: "eglMakeCurrent",
                source,
            })
    }

    /// コマンドを提出し、サーフェスをスワップして 1 フレームを提示する
    ///
    /// 提出完了で戻る。消費者側の表示完了までは保証しない。
    pub fn swap_buffers(&self, surface: &Surface<WindowSurface>) -> Result<(), GlError> {
        surface
            .swap_buffers(&self.context)
            .map_err(|source| GlError::Context {
                call: "eglSwapBuffers",
                source,
            })
    }

    /// ネイティブウィンドウに対する提示用サーフェスを作成する
    ///
    /// raw ハンドルはサイズ情報を持たないため、寸法は明示的に受け取る。
    pub fn create_window_surface(
        &self,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Surface<WindowSurface>, GlError> {
        let (w, h) = match (NonZeroU32::new(width), NonZeroU32::new(height)) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                return Err(GlError::Misuse {
                    reason: "ウィンドウサーフェスのサイズに 0 は指定できない",
                })
            }
        };
        let attrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(window, w, h);
        unsafe { self.display.create_window_surface(&self.config, &attrs) }.map_err(|source| {
            GlError::Context {
                call: "eglCreateWindowSurface",
                source,
            }
        })
    }

    /// 新しいテクスチャを割り当てる
    ///
    /// 戻り値の所有権は呼び出し側。不要になったら [`delete_texture`]
    /// (GlContext::delete_texture) で解放すること。コンテキストを current に
    /// してから呼ぶ。
    pub fn create_texture(
        &self,
        kind: TextureKind,
        width: u32,
        height: u32,
    ) -> Result<GlTexture, GlError> {
        let target = kind.gl_target();
        let mut id: u32 = 0;
        unsafe {
            gl::GenTextures(1, &mut id);
            gl::BindTexture(target, id);
            gl::TexParameteri(target, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(target, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(target, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
            gl::TexParameteri(target, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
        }
        check_gl("glTexParameteri")?;

        // 外部テクスチャのストレージは EGLImage / デコーダ側が供給する
        if kind == TextureKind::Texture2D {
            unsafe {
                gl::TexImage2D(
                    gl::TEXTURE_2D,
                    0,
                    gl::RGBA as i32,
                    width as i32,
                    height as i32,
                    0,
                    gl::RGBA,
                    gl::UNSIGNED_BYTE,
                    std::ptr::null(),
                );
            }
            check_gl("glTexImage2D")?;
        }

        Ok(GlTexture {
            kind,
            id,
            width,
            height,
        })
    }

    /// [`create_texture`](GlContext::create_texture) で割り当てたテクスチャを解放する
    pub fn delete_texture(&self, texture: &GlTexture) {
        unsafe {
            gl::DeleteTextures(1, &texture.id);
        }
    }

    /// DMA-BUF フレームを EGLImage として取り込む
    ///
    /// バッファの所有権は移動しない。イメージハンドルが生きている間、
    /// OS がバッファの参照を 1 つ保持する。記述子が不正・非対応の場合は
    /// エラーを報告する（クラッシュしない）。
    pub fn import_dma_buf(&self, frame: &DmaBufFrame) -> Result<EglImage, GlError> {
        let fns = self.egl_image_fns()?;
        let display_ptr = match self.display.raw_display() {
            RawDisplay::Egl(ptr) => ptr,
            _ => {
                return Err(GlError::MissingExtension {
                    name: "EGL ディスプレイ (DMA-BUF 取り込みは EGL 限定)",
                })
            }
        };
        EglImage::from_dma_buf(display_ptr, *fns, frame)
    }

    /// EGL 拡張関数の表を取得する（初回のみ解決）
    fn egl_image_fns(&self) -> Result<&EglImageFns, GlError> {
        self.egl_fns.get_or_try_init(|| {
            // SAFETY: get_proc_address が返した非 NULL ポインタを、
            // 対応する EGL / GL 拡張のシグネチャに変換する。
            unsafe {
                Ok(EglImageFns {
                    create_image: std::mem::transmute(
                        self.load_fn("eglCreateImageKHR")?,
                    ),
                    destroy_image: std::mem::transmute(
                        self.load_fn("eglDestroyImageKHR")?,
                    ),
                    get_error: std::mem::transmute(self.load_fn("eglGetError")?),
                    image_target_texture_2d: std::mem::transmute(
                        self.load_fn("glEGLImageTargetTexture2DOES")?,
                    ),
                })
            }
        })
    }

    /// 拡張関数のポインタを解決する（見つからなければエラー）
    fn load_fn(&self, name: &'static str) -> Result<*const c_void, GlError> {
        let cname = CString::new(name).map_err(|_| GlError::MissingExtension { name })?;
        let ptr = self.display.get_proc_address(&cname);
        if ptr.is_null() {
            log::warn!("{} が見つかりません (ドライバが拡張未対応)", name);
            return Err(GlError::MissingExtension { name });
        }
        Ok(ptr)
    }
}
