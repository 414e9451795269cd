//! スロット表（FrameRouter）の契約テスト
//!
//! GPU を使わずに付け外し・置き換え・配信順・スロット単位の失敗分離を
//! 検証する。出力先には描画呼び出しを記録するフェイクを差し込む。

use std::sync::{Arc, Mutex};

use camera_gl_pipeline::{
    FrameRouter, FrameSink, GlError, GlTexture, OutputSlot, TextureKind, TransformMatrix,
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    SurfaceCreated { sink: u32 },
    Rendered { sink: u32, texture: u32, transform: [f32; 16] },
    Destroyed { sink: u32 },
}

/// OutputRenderer と同じ形（遅延サーフェス + 冪等 destroy）を模したフェイク
struct RecordingSink {
    id: u32,
    fail: bool,
    surface: Option<u32>,
    destroyed: bool,
    log: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSink {
    fn boxed(id: u32, fail: bool, log: &Arc<Mutex<Vec<Event>>>) -> Box<Self> {
        Box::new(RecordingSink {
            id,
            fail,
            surface: None,
            destroyed: false,
            log: Arc::clone(log),
        })
    }

    fn push(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }
}

impl FrameSink for RecordingSink {
    fn render(
        &mut self,
        texture: &GlTexture,
        transform: &TransformMatrix,
    ) -> Result<(), GlError> {
        if self.fail {
            return Err(GlError::SurfaceGone);
        }
        if self.surface.is_none() {
            // 実物と同じく初回描画でサーフェスを遅延生成する
            self.surface = Some(self.id);
            self.push(Event::SurfaceCreated { sink: self.id });
        }
        self.push(Event::Rendered {
            sink: self.id,
            texture: texture.id,
            transform: transform.into_inner(),
        });
        Ok(())
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.surface = None;
            self.push(Event::Destroyed { sink: self.id });
        }
    }
}

fn input_texture() -> GlTexture {
    GlTexture {
        kind: TextureKind::ExternalOes,
        id: 42,
        width: 1920,
        height: 1080,
    }
}

fn rendered_sinks(log: &Arc<Mutex<Vec<Event>>>) -> Vec<u32> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Rendered { sink, .. } => Some(*sink),
            _ => None,
        })
        .collect()
}

#[test]
fn input_texture_id_is_stable_across_attach_detach_interleavings() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = FrameRouter::new();
    let input = input_texture();

    router.attach(OutputSlot::Preview, RecordingSink::boxed(1, false, &log));
    router.dispatch(&input, &TransformMatrix::IDENTITY);

    router.attach(OutputSlot::Recording, RecordingSink::boxed(2, false, &log));
    router.dispatch(&input, &TransformMatrix::IDENTITY);

    router.detach(OutputSlot::Preview);
    router.attach(OutputSlot::Analysis, RecordingSink::boxed(3, false, &log));
    router.dispatch(&input, &TransformMatrix::IDENTITY);

    // どの描画も構築時に固定した入力テクスチャ id を観測する
    for event in log.lock().unwrap().iter() {
        if let Event::Rendered { texture, .. } = event {
            assert_eq!(*texture, 42);
        }
    }
}

#[test]
fn replacing_a_slot_tears_down_the_previous_target() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = FrameRouter::new();

    router.attach(OutputSlot::Preview, RecordingSink::boxed(1, false, &log));
    router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);

    // 置き換え: A のサーフェスは新しい B より先に破棄される
    router.attach(OutputSlot::Preview, RecordingSink::boxed(2, false, &log));
    router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);

    let events = log.lock().unwrap().clone();
    let destroy_pos = events
        .iter()
        .position(|e| *e == Event::Destroyed { sink: 1 })
        .expect("旧出力先が破棄されていない");
    // 破棄後に旧サーフェスへの描画が 1 件もないこと
    assert!(events[destroy_pos..].iter().all(|e| !matches!(
        e,
        Event::Rendered { sink: 1, .. } | Event::SurfaceCreated { sink: 1 }
    )));
    assert_eq!(rendered_sinks(&log).last(), Some(&2));
}

#[test]
fn surface_is_created_at_most_once_per_attachment() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = FrameRouter::new();
    router.attach(OutputSlot::Preview, RecordingSink::boxed(1, false, &log));

    for _ in 0..5 {
        router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);
    }

    let created = log
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::SurfaceCreated { sink: 1 }))
        .count();
    assert_eq!(created, 1);
    assert_eq!(rendered_sinks(&log).len(), 5);
}

#[test]
fn dispatch_order_is_fixed() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = FrameRouter::new();
    // 登録順とは無関係に preview → recording → analysis の順で描画される
    router.attach(OutputSlot::Analysis, RecordingSink::boxed(3, false, &log));
    router.attach(OutputSlot::Preview, RecordingSink::boxed(1, false, &log));
    router.attach(OutputSlot::Recording, RecordingSink::boxed(2, false, &log));

    router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);
    assert_eq!(rendered_sinks(&log), vec![1, 2, 3]);
}

#[test]
fn broken_preview_does_not_starve_recording_or_analysis() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = FrameRouter::new();
    router.attach(OutputSlot::Preview, RecordingSink::boxed(1, true, &log));
    router.attach(OutputSlot::Recording, RecordingSink::boxed(2, false, &log));
    router.attach(OutputSlot::Analysis, RecordingSink::boxed(3, false, &log));

    let rendered = router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);
    assert_eq!(rendered, 2);
    assert_eq!(rendered_sinks(&log), vec![2, 3]);
    // 壊れたスロットは切り離され、再アタッチまでスキップされる
    assert!(!router.is_attached(OutputSlot::Preview));
}

#[test]
fn three_frames_to_preview_produce_three_identity_draws() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = FrameRouter::new();
    router.attach(OutputSlot::Preview, RecordingSink::boxed(1, false, &log));

    for _ in 0..3 {
        router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);
    }

    let events = log.lock().unwrap().clone();
    let draws: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Rendered { transform, .. } => Some(*transform),
            _ => None,
        })
        .collect();
    assert_eq!(draws.len(), 3);
    for t in draws {
        assert_eq!(t, TransformMatrix::IDENTITY.into_inner());
    }
}

#[test]
fn per_frame_transform_reaches_the_sink_unmodified() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = FrameRouter::new();
    router.attach(OutputSlot::Analysis, RecordingSink::boxed(3, false, &log));

    let rotation = TransformMatrix::rotation_degrees(90.0);
    router.dispatch(&input_texture(), &rotation);

    let events = log.lock().unwrap().clone();
    match &events[..] {
        [Event::SurfaceCreated { .. }, Event::Rendered { transform, .. }] => {
            assert_eq!(*transform, rotation.into_inner());
        }
        other => panic!("想定外のイベント列: {:?}", other),
    }
}

#[test]
fn removing_recording_mid_stream_leaves_preview_running() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = FrameRouter::new();
    router.attach(OutputSlot::Preview, RecordingSink::boxed(1, false, &log));
    router.attach(OutputSlot::Recording, RecordingSink::boxed(2, false, &log));

    router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);
    router.detach(OutputSlot::Recording);
    router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);
    router.dispatch(&input_texture(), &TransformMatrix::IDENTITY);

    assert_eq!(rendered_sinks(&log), vec![1, 2, 1, 1]);
}
