//! DMA-BUF フレーム記述子
//!
//! 解析ブリッジなど GPU 外の消費者へゼロコピーでフレームを渡すための、
//! OS が参照カウントする共有バッファの記述。パイプラインはこのバッファを
//! **借用** するだけで所有しない。fd のクローズとバッファの寿命管理は
//! 呼び出し側の責任（描画が flush で完了するまで有効に保つこと）。

use std::os::unix::io::RawFd;

/// drm_fourcc.h の fourcc_code と同じ並び
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

/// RGBA8888（メモリ順 R,G,B,A）
pub const DRM_FORMAT_ABGR8888: u32 = fourcc(b"AB24");
/// BGRA8888（メモリ順 B,G,R,A）
pub const DRM_FORMAT_ARGB8888: u32 = fourcc(b"AR24");
/// BGRX8888（アルファ無視）
pub const DRM_FORMAT_XRGB8888: u32 = fourcc(b"XR24");
/// RGBX8888（アルファ無視）
pub const DRM_FORMAT_XBGR8888: u32 = fourcc(b"XB24");

/// リニア配置（タイリングなし）
pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
/// 不明・未指定のモディファイア
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// 単一プレーンの DMA-BUF フレーム記述子
///
/// カメラドライバや GPU アロケータがエクスポートしたバッファを
/// EGLImage として取り込むのに必要な最小限のメタデータ。
#[derive(Debug, Clone, Copy)]
pub struct DmaBufFrame {
    /// DMA-BUF のファイルディスクリプタ（借用。クローズしない）
    pub fd: RawFd,
    /// ピクセル幅
    pub width: u32,
    /// ピクセル高さ
    pub height: u32,
    /// DRM fourcc フォーマットコード
    pub fourcc: u32,
    /// プレーン 0 の行ピッチ（バイト）
    pub stride: u32,
    /// プレーン 0 の先頭オフセット（バイト）
    pub offset: u32,
    /// DRM フォーマットモディファイア。`None` はリニア前提のドライバ任せ
    pub modifier: Option<u64>,
}

impl DmaBufFrame {
    /// リニア配置の単一プレーンバッファ用の記述子を作る
    pub fn linear(fd: RawFd, width: u32, height: u32, fourcc: u32, stride: u32) -> Self {
        DmaBufFrame {
            fd,
            width,
            height,
            fourcc,
            stride,
            offset: 0,
            modifier: Some(DRM_FORMAT_MOD_LINEAR),
        }
    }

    /// 記述子の明らかな不整合を検査する
    pub fn validate(&self) -> Result<(), String> {
        if self.fd < 0 {
            return Err(format!("fd が不正です: {}", self.fd));
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!("サイズが不正です: {}x{}", self.width, self.height));
        }
        if self.stride < self.width {
            // 8bit 4ch 前提ではないので厳密な下限は判らないが、
            // 幅より小さいピッチはどのフォーマットでもあり得ない
            return Err(format!(
                "stride ({}) が幅 ({}) より小さい",
                self.stride, self.width
            ));
        }
        if self.modifier == Some(DRM_FORMAT_MOD_INVALID) {
            return Err("モディファイアが DRM_FORMAT_MOD_INVALID です".to_string());
        }
        Ok(())
    }
}
