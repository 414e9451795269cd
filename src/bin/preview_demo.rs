//! パイプラインの動作確認用プレビューデモ
//!
//! 合成したテストパターンを入力テクスチャへアップロードし、
//! プレビュースロットにバインドしたウィンドウへ毎フレーム配信する。
//!
//! 使用方法:
//! RUST_LOG=info cargo run --bin preview_demo

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowId};

use camera_gl_pipeline::{
    FramePipeline, OutputSlot, TextureKind, TransformMatrix, WindowTarget,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// 動くグラデーションの RGBA フレームを合成する
fn gradient_frame(width: u32, height: u32, frame: u64) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    let t = (frame % 256) as u32;
    for y in 0..height {
        for x in 0..width {
            pixels.push(((x * 255 / width + t) % 256) as u8);
            pixels.push(((y * 255 / height) % 256) as u8);
            pixels.push((t % 256) as u8);
            pixels.push(255);
        }
    }
    pixels
}

#[derive(Default)]
struct DemoApp {
    window: Option<Window>,
    pipeline: Option<FramePipeline>,
    frame: u64,
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = event_loop
            .create_window(
                Window::default_attributes()
                    .with_title("camera-gl-pipeline preview demo")
                    .with_inner_size(LogicalSize::new(WIDTH as f64, HEIGHT as f64)),
            )
            .expect("ウィンドウの作成に失敗");

        // デモは CPU からフレームを供給するので入力は Texture2D
        let raw_display = event_loop
            .display_handle()
            .expect("ディスプレイハンドルの取得に失敗")
            .as_raw();
        let pipeline = FramePipeline::new(raw_display, WIDTH, HEIGHT, TextureKind::Texture2D)
            .expect("パイプラインの作成に失敗");

        let size = window.inner_size();
        let raw_window = window
            .window_handle()
            .expect("ウィンドウハンドルの取得に失敗")
            .as_raw();
        pipeline
            .set_output(
                OutputSlot::Preview,
                WindowTarget::new(raw_window, size.width, size.height),
            )
            .expect("プレビュー出力のバインドに失敗");

        log::info!("プレビューを開始します: {}x{}", WIDTH, HEIGHT);

        self.window = Some(window);
        self.pipeline = Some(pipeline);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("終了します (フレーム数: {})", self.frame);
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let (Some(pipeline), Some(window)) = (&self.pipeline, &self.window) {
                    let pixels = gradient_frame(WIDTH, HEIGHT, self.frame);
                    if let Err(e) = pipeline.write_input_frame(&pixels) {
                        log::error!("入力フレームのアップロードに失敗: {}", e);
                        event_loop.exit();
                        return;
                    }
                    if let Err(e) = pipeline.on_frame_available(&TransformMatrix::IDENTITY) {
                        log::error!("フレーム配信に失敗: {}", e);
                        event_loop.exit();
                        return;
                    }
                    self.frame += 1;
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let event_loop = EventLoop::new()?;
    let mut app = DemoApp::default();
    event_loop.run_app(&mut app)?;

    Ok(())
}
