//! DMA-BUF → EGLImage の取り込み
//!
//! eglCreateImageKHR / glEGLImageTargetTexture2DOES は拡張関数なので、
//! ディスプレイの get_proc_address で実行時に解決する。EGLImage は
//! バッファへの参照を OS 側で 1 つ増やすだけで、バッファ自体の所有権は
//! 呼び出し側に残る。Drop で解放するのは **取り込み（イメージハンドル）のみ**。

use std::ffi::c_void;

use crate::dmabuf::DmaBufFrame;
use crate::error::{check_gl, GlError};

// ─── EGL 拡張定数 ───────────────────────────────────────────────────────────

const EGL_NONE: i32 = 0x3038;
const EGL_WIDTH: i32 = 0x3057;
const EGL_HEIGHT: i32 = 0x3056;
const EGL_LINUX_DMA_BUF_EXT: u32 = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: i32 = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: i32 = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: i32 = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: i32 = 0x3274;
const EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT: i32 = 0x3443;
const EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT: i32 = 0x3444;

type EglCreateImageKhr = unsafe extern "C" fn(
    display: *const c_void,
    context: *const c_void,
    target: u32,
    client_buffer: *const c_void,
    attrib_list: *const i32,
) -> *const c_void;

type EglDestroyImageKhr =
    unsafe extern "C" fn(display: *const c_void, image: *const c_void) -> u32;

type EglGetError = unsafe extern "C" fn() -> i32;

type GlEglImageTargetTexture2dOes = unsafe extern "C" fn(target: u32, image: *const c_void);

/// 実行時に解決した EGL / GL 拡張関数の表
#[derive(Clone, Copy)]
pub(crate) struct EglImageFns {
    pub create_image: EglCreateImageKhr,
    pub destroy_image: EglDestroyImageKhr,
    pub get_error: EglGetError,
    pub image_target_texture_2d: GlEglImageTargetTexture2dOes,
}

/// eglCreateImageKHR に渡す属性リストを組み立てる
pub(crate) fn dma_buf_attribs(frame: &DmaBufFrame) -> Vec<i32> {
    let mut attribs = vec![
        EGL_WIDTH,
        frame.width as i32,
        EGL_HEIGHT,
        frame.height as i32,
        EGL_LINUX_DRM_FOURCC_EXT,
        frame.fourcc as i32,
        EGL_DMA_BUF_PLANE0_FD_EXT,
        frame.fd,
        EGL_DMA_BUF_PLANE0_OFFSET_EXT,
        frame.offset as i32,
        EGL_DMA_BUF_PLANE0_PITCH_EXT,
        frame.stride as i32,
    ];
    if let Some(modifier) = frame.modifier {
        attribs.extend_from_slice(&[
            EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT,
            (modifier & 0xffff_ffff) as i32,
            EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT,
            (modifier >> 32) as i32,
        ]);
    }
    attribs.push(EGL_NONE);
    attribs
}

/// 取り込み済みの EGLImage ハンドル
///
/// Drop でイメージハンドルを解放する。背後の DMA-BUF は解放しない
/// （所有権は呼び出し側 / OS にある）。
pub struct EglImage {
    display: *const c_void,
    image: *const c_void,
    fns: EglImageFns,
}

impl EglImage {
    /// DMA-BUF 記述子から EGLImage を作成する
    ///
    /// 成功すると OS 側でバッファの参照カウントが 1 増える。
    pub(crate) fn from_dma_buf(
        display: *const c_void,
        fns: EglImageFns,
        frame: &DmaBufFrame,
    ) -> Result<Self, GlError> {
        if let Err(reason) = frame.validate() {
            return Err(GlError::InvalidBuffer { reason });
        }

        let attribs = dma_buf_attribs(frame);
        let image = unsafe {
            (fns.create_image)(
                display,
                std::ptr::null(), // EGL_NO_CONTEXT
                EGL_LINUX_DMA_BUF_EXT,
                std::ptr::null(), // client_buffer は DMA-BUF では未使用
                attribs.as_ptr(),
            )
        };

        if image.is_null() {
            let code = unsafe { (fns.get_error)() };
            return Err(GlError::Egl {
                call: "eglCreateImageKHR",
                code,
            });
        }

        log::debug!(
            "EGLImage を作成しました: {}x{} fourcc=0x{:08X}",
            frame.width,
            frame.height,
            frame.fourcc
        );

        Ok(EglImage {
            display,
            image,
            fns,
        })
    }

    /// 現在バインド中のテクスチャをこのイメージのストレージに接続する
    ///
    /// 呼び出し前に対象テクスチャを `target` にバインドしておくこと。
    pub fn bind_to_texture(&self, target: u32) -> Result<(), GlError> {
        unsafe {
            (self.fns.image_target_texture_2d)(target, self.image);
        }
        check_gl("glEGLImageTargetTexture2DOES")
    }
}

impl Drop for EglImage {
    fn drop(&mut self) {
        unsafe {
            (self.fns.destroy_image)(self.display, self.image);
        }
    }
}
