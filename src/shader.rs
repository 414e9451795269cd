//! パススルーシェーダ
//!
//! 入力テクスチャを変換行列つきの単位クアッドとして描くだけのプログラム。
//! すべての出力先がこの 1 本の描画パスを共有することで、出力間の見た目を
//! 変換以外で揃える（色処理は行わない）。通常の 2D テクスチャと外部
//! （ゼロコピー）テクスチャの両方に対応し、プログラムは種別ごとに初回の
//! draw で遅延コンパイルする。

use std::ffi::CString;

use once_cell::sync::OnceCell;

use crate::context::{GlTexture, TextureKind};
use crate::error::{check_gl, GlError};
use crate::transform::TransformMatrix;

/// 単位クアッド: (x, y, u, v) x 4 頂点のトライアングルストリップ
const QUAD_VERTICES: [f32; 16] = [
    -1.0, -1.0, 0.0, 0.0, //
    1.0, -1.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, 1.0, //
    1.0, 1.0, 1.0, 1.0, //
];

const VERTEX_SOURCE: &str = r#"#version 300 es
in vec2 aPosition;
in vec2 aTexCoord;
uniform mat4 uTransform;
out vec2 vTexCoord;
void main() {
    gl_Position = uTransform * vec4(aPosition, 0.0, 1.0);
    vTexCoord = aTexCoord;
}
"#;

const FRAGMENT_SOURCE_2D: &str = r#"#version 300 es
precision mediump float;
in vec2 vTexCoord;
uniform sampler2D uTexture;
out vec4 outColor;
void main() {
    outColor = texture(uTexture, vTexCoord);
}
"#;

const FRAGMENT_SOURCE_EXTERNAL: &str = r#"#version 300 es
#extension GL_OES_EGL_image_external_essl3 : require
precision mediump float;
in vec2 vTexCoord;
uniform samplerExternalOES uTexture;
out vec4 outColor;
void main() {
    outColor = texture(uTexture, vTexCoord);
}
"#;

/// テクスチャ種別に応じたフラグメントシェーダを選ぶ
fn fragment_source(kind: TextureKind) -> &'static str {
    match kind {
        TextureKind::Texture2D => FRAGMENT_SOURCE_2D,
        TextureKind::ExternalOes => FRAGMENT_SOURCE_EXTERNAL,
    }
}

/// コンパイル済みプログラムと各ロケーション
struct Program {
    id: u32,
    u_transform: i32,
    u_texture: i32,
    a_position: u32,
    a_tex_coord: u32,
}

/// パススルーシェーダ
///
/// GL リソース（プログラム、VBO）を持つため、解放はコンテキストが
/// current の状態で [`destroy`](PassThroughShader::destroy) を呼ぶ。
pub struct PassThroughShader {
    program_2d: OnceCell<Program>,
    program_external: OnceCell<Program>,
    vbo: OnceCell<u32>,
}

impl PassThroughShader {
    pub fn new() -> Self {
        PassThroughShader {
            program_2d: OnceCell::new(),
            program_external: OnceCell::new(),
            vbo: OnceCell::new(),
        }
    }

    /// テクスチャを変換行列つきで描画する
    ///
    /// コンテキストと描画先（サーフェスまたは FBO）を呼び出し側で
    /// current にしてから呼ぶこと。
    pub fn draw(&self, texture: &GlTexture, transform: &TransformMatrix) -> Result<(), GlError> {
        let program = match texture.kind {
            TextureKind::Texture2D => self.program_2d.get_or_try_init(|| compile_program(texture.kind))?,
            TextureKind::ExternalOes => self
                .program_external
                .get_or_try_init(|| compile_program(texture.kind))?,
        };
        let vbo = self.vbo.get_or_try_init(create_quad_vbo)?;

        unsafe {
            gl::UseProgram(program.id);
            gl::BindBuffer(gl::ARRAY_BUFFER, *vbo);
            gl::EnableVertexAttribArray(program.a_position);
            gl::VertexAttribPointer(
                program.a_position,
                2,
                gl::FLOAT,
                gl::FALSE,
                16,
                std::ptr::null(),
            );
            gl::EnableVertexAttribArray(program.a_tex_coord);
            gl::VertexAttribPointer(
                program.a_tex_coord,
                2,
                gl::FLOAT,
                gl::FALSE,
                16,
                8 as *const _,
            );

            gl::ActiveTexture(gl::TEXTURE0);
            gl::BindTexture(texture.target(), texture.id);
            gl::Uniform1i(program.u_texture, 0);
            gl::UniformMatrix4fv(program.u_transform, 1, gl::FALSE, transform.as_ptr());

            gl::DrawArrays(gl::TRIANGLE_STRIP, 0, 4);
        }
        check_gl("glDrawArrays")
    }

    /// GL リソースを解放する（コンテキストが current の状態で呼ぶ）
    ///
    /// 2 回呼んでも安全（2 回目は何もしない）。
    pub fn destroy(&mut self) {
        unsafe {
            if let Some(p) = self.program_2d.take() {
                gl::DeleteProgram(p.id);
            }
            if let Some(p) = self.program_external.take() {
                gl::DeleteProgram(p.id);
            }
            if let Some(vbo) = self.vbo.take() {
                gl::DeleteBuffers(1, &vbo);
            }
        }
    }
}

impl Default for PassThroughShader {
    fn default() -> Self {
        Self::new()
    }
}

/// クアッド頂点を載せた VBO を作る
fn create_quad_vbo() -> Result<u32, GlError> {
    let mut vbo: u32 = 0;
    unsafe {
        gl::GenBuffers(1, &mut vbo);
        gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
        gl::BufferData(
            gl::ARRAY_BUFFER,
            std::mem::size_of_val(&QUAD_VERTICES) as isize,
            QUAD_VERTICES.as_ptr().cast(),
            gl::STATIC_DRAW,
        );
    }
    check_gl("glBufferData")?;
    Ok(vbo)
}

/// 種別に応じたプログラムをコンパイル・リンクする
fn compile_program(kind: TextureKind) -> Result<Program, GlError> {
    let vs = compile_shader(gl::VERTEX_SHADER, VERTEX_SOURCE, "頂点")?;
    let fs = match compile_shader(gl::FRAGMENT_SHADER, fragment_source(kind), "フラグメント") {
        Ok(fs) => fs,
        Err(e) => {
            unsafe { gl::DeleteShader(vs) };
            return Err(e);
        }
    };

    let id = unsafe {
        let id = gl::CreateProgram();
        gl::AttachShader(id, vs);
        gl::AttachShader(id, fs);
        gl::LinkProgram(id);
        // リンク後はシェーダオブジェクト不要
        gl::DeleteShader(vs);
        gl::DeleteShader(fs);

        let mut status = 0;
        gl::GetProgramiv(id, gl::LINK_STATUS, &mut status);
        if status == 0 {
            let log = read_info_log(id, true);
            gl::DeleteProgram(id);
            return Err(GlError::ProgramLink { log });
        }
        id
    };

    let u_transform = uniform_location(id, "uTransform")?;
    let u_texture = uniform_location(id, "uTexture")?;
    let a_position = attrib_location(id, "aPosition")?;
    let a_tex_coord = attrib_location(id, "aTexCoord")?;

    log::debug!("パススルーシェーダをコンパイルしました: {:?}", kind);

    Ok(Program {
        id,
        u_transform,
        u_texture,
        a_position,
        a_tex_coord,
    })
}

fn compile_shader(stage_kind: u32, source: &str, stage: &'static str) -> Result<u32, GlError> {
    unsafe {
        let id = gl::CreateShader(stage_kind);
        let src = CString::new(source).unwrap();
        gl::ShaderSource(id, 1, &src.as_ptr(), std::ptr::null());
        gl::CompileShader(id);

        let mut status = 0;
        gl::GetShaderiv(id, gl::COMPILE_STATUS, &mut status);
        if status == 0 {
            let log = read_info_log(id, false);
            gl::DeleteShader(id);
            return Err(GlError::ShaderCompile { stage, log });
        }
        Ok(id)
    }
}

/// シェーダ / プログラムのインフォログを読む
fn read_info_log(id: u32, program: bool) -> String {
    unsafe {
        let mut len = 0;
        if program {
            gl::GetProgramiv(id, gl::INFO_LOG_LENGTH, &mut len);
        } else {
            gl::GetShaderiv(id, gl::INFO_LOG_LENGTH, &mut len);
        }
        let mut buf = vec![0u8; len.max(1) as usize];
        if program {
            gl::GetProgramInfoLog(id, len, std::ptr::null_mut(), buf.as_mut_ptr().cast());
        } else {
            gl::GetShaderInfoLog(id, len, std::ptr::null_mut(), buf.as_mut_ptr().cast());
        }
        String::from_utf8_lossy(&buf)
            .trim_end_matches('\0')
            .trim()
            .to_string()
    }
}

fn uniform_location(program: u32, name: &'static str) -> Result<i32, GlError> {
    let cname = CString::new(name).unwrap();
    let loc = unsafe { gl::GetUniformLocation(program, cname.as_ptr()) };
    if loc < 0 {
        return Err(GlError::ProgramLink {
            log: format!("uniform {} が見つかりません", name),
        });
    }
    Ok(loc)
}

fn attrib_location(program: u32, name: &'static str) -> Result<u32, GlError> {
    let cname = CString::new(name).unwrap();
    let loc = unsafe { gl::GetAttribLocation(program, cname.as_ptr()) };
    if loc < 0 {
        return Err(GlError::ProgramLink {
            log: format!("attribute {} が見つかりません", name),
        });
    }
    Ok(loc as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_fragment_shader_uses_oes_sampler() {
        let src = fragment_source(TextureKind::ExternalOes);
        assert!(src.contains("samplerExternalOES"));
        assert!(src.contains("GL_OES_EGL_image_external_essl3"));
    }

    #[test]
    fn texture2d_fragment_shader_uses_plain_sampler() {
        let src = fragment_source(TextureKind::Texture2D);
        assert!(src.contains("sampler2D"));
        assert!(!src.contains("samplerExternalOES"));
    }

    #[test]
    fn quad_covers_clip_space() {
        // ストリップの 4 頂点がクリップ空間の四隅を成す
        let xs: Vec<f32> = QUAD_VERTICES.chunks(4).map(|v| v[0]).collect();
        let ys: Vec<f32> = QUAD_VERTICES.chunks(4).map(|v| v[1]).collect();
        assert_eq!(xs.iter().cloned().fold(f32::MAX, f32::min), -1.0);
        assert_eq!(xs.iter().cloned().fold(f32::MIN, f32::max), 1.0);
        assert_eq!(ys.iter().cloned().fold(f32::MAX, f32::min), -1.0);
        assert_eq!(ys.iter().cloned().fold(f32::MIN, f32::max), 1.0);
    }
}
