//! フレームごとの変換行列
//!
//! センサーの向きから導出される回転・ミラーを出力先へ合成するときに使う。
//! 16 要素の column-major 行列で、毎フレーム呼び出し側が供給する
//! （パイプライン側では保持しない）。

/// 4x4 変換行列（column-major）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformMatrix([f32; 16]);

impl TransformMatrix {
    /// 単位行列
    pub const IDENTITY: TransformMatrix = TransformMatrix([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0, //
    ]);

    /// column-major の 16 要素から構築する
    pub fn from_column_major(m: [f32; 16]) -> Self {
        TransformMatrix(m)
    }

    /// Z 軸まわりの回転行列（度指定、反時計回り）
    pub fn rotation_degrees(degrees: f32) -> Self {
        let r = degrees.to_radians();
        let (s, c) = r.sin_cos();
        TransformMatrix([
            c, s, 0.0, 0.0, //
            -s, c, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, //
        ])
    }

    /// 左右反転（フロントカメラのミラー用）を合成した行列を返す
    pub fn mirrored(self) -> Self {
        let flip = TransformMatrix([
            -1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, //
        ]);
        self.then(flip)
    }

    /// センサーの向きから変換行列を導出する
    ///
    /// `rotation_degrees` はセンサーとディスプレイの相対角度（0/90/180/270 を想定）、
    /// `mirrored` はフロントカメラの左右反転。
    pub fn from_orientation(rotation_degrees: f32, mirrored: bool) -> Self {
        let m = Self::rotation_degrees(rotation_degrees);
        if mirrored {
            m.mirrored()
        } else {
            m
        }
    }

    /// `self` を適用したあとに `next` を適用する合成行列（`next * self`）
    pub fn then(self, next: Self) -> Self {
        let a = &next.0;
        let b = &self.0;
        let mut out = [0.0f32; 16];
        for col in 0..4 {
            for row in 0..4 {
                let mut v = 0.0;
                for k in 0..4 {
                    v += a[k * 4 + row] * b[col * 4 + k];
                }
                out[col * 4 + row] = v;
            }
        }
        TransformMatrix(out)
    }

    /// glUniformMatrix4fv に渡すポインタ
    pub fn as_ptr(&self) -> *const f32 {
        self.0.as_ptr()
    }

    /// column-major の要素列を返す
    pub fn into_inner(self) -> [f32; 16] {
        self.0
    }
}

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}
