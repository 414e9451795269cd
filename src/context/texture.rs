//! GPU テクスチャのハンドル型
//!
//! 生成したコンポーネント（コンテキスト、またはパイプライン）が所有権を持ち、
//! 明示的に解放する。この型自体は Drop で何もしない値型。

/// gl クレートに含まれない拡張定数
pub mod gl_ext {
    /// GL_TEXTURE_EXTERNAL_OES — ゼロコピー入力テクスチャのターゲット
    pub const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;
}

/// テクスチャの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// 通常の 2D テクスチャ
    Texture2D,
    /// 外部（ゼロコピー）テクスチャ。カメラデコーダが直接書き込む
    ExternalOes,
}

impl TextureKind {
    /// glBindTexture に渡すターゲット
    pub fn gl_target(self) -> u32 {
        match self {
            TextureKind::Texture2D => gl::TEXTURE_2D,
            TextureKind::ExternalOes => gl_ext::TEXTURE_EXTERNAL_OES,
        }
    }
}

/// GPU テクスチャのハンドル
///
/// 構築後は不変。`id` の解放は所有者が [`GlContext`](super::GlContext) 経由で行う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlTexture {
    pub kind: TextureKind,
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

impl GlTexture {
    /// glBindTexture に渡すターゲット
    pub fn target(&self) -> u32 {
        self.kind.gl_target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_to_expected_gl_target() {
        assert_eq!(TextureKind::Texture2D.gl_target(), gl::TEXTURE_2D);
        assert_eq!(TextureKind::ExternalOes.gl_target(), 0x8D65);
    }
}
