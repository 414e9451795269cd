//! カメラ映像の GL フレーム配信パイプライン
//!
//! カメラの生フレームを受け取る 1 枚の共有入力テクスチャを所有し、
//! 毎フレーム、プレビュー / 録画 / 解析の各出力先へコピー最小で描画する。
//! 解析向けには、描画済みフレームを DMA-BUF へゼロコピーで書き出す
//! 経路も提供する。
//!
//! ## 全体の流れ
//! 1. キャプチャソースがデコード済みフレームを入力テクスチャへ書き込む
//! 2. `on_frame_available(transform)` が呼ばれる
//! 3. パイプラインがアタッチ済みの各出力のサーフェスを current にし、
//!    パススルーシェーダでクアッドを描画して提示する
//!
//! 出力の付け外しはフレーム供給と独立しており、別スレッドから安全に
//! 呼べる（内部の単一ロックで直列化される）。

pub mod context;
pub mod dmabuf;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod shader;
pub mod transform;

pub use context::{GlContext, GlTexture, TextureKind};
pub use dmabuf::DmaBufFrame;
pub use error::GlError;
pub use output::{FrameSink, OutputRenderer, OutputSlot, WindowTarget};
pub use pipeline::{FramePipeline, FrameRouter};
pub use shader::PassThroughShader;
pub use transform::TransformMatrix;
