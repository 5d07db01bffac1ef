// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use image::RgbImage;
use yolo_restream::detection::{BBox, Detection, Detector, Frame, ReplayDetector};
use yolo_restream::input::FrameSource;
use yolo_restream::output::{DetectionLog, FrameSink};
use yolo_restream::pipeline::{PipelineDriver, PipelineState, StopReason};
use yolo_restream::renderer::{Annotator, ColorTable};
use yolo_restream::{LabelMap, PipelineError};

struct StillSource {
    remaining: u64,
    next: u64,
    released: Arc<Mutex<bool>>,
}

impl FrameSource for StillSource {
    fn frame_rate(&self) -> f64 {
        25.0
    }

    fn frame_size(&self) -> (u32, u32) {
        (100, 500)
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.next += 1;
        Some(Frame::new(self.next - 1, RgbImage::new(100, 500)))
    }

    fn release(&mut self) {
        *self.released.lock().unwrap() = true;
    }
}

/// 保存写入的帧
#[derive(Clone, Default)]
struct Capture {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<Mutex<bool>>,
}

impl FrameSink for Capture {
    fn write_frame(&mut self, _frame_index: u64, data: &[u8]) -> Result<(), PipelineError> {
        self.frames.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn close(self) -> Result<(), PipelineError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

fn pixel(frame: &[u8], width: usize, x: usize, y: usize) -> [u8; 3] {
    let i = (y * width + x) * 3;
    [frame[i], frame[i + 1], frame[i + 2]]
}

#[test]
fn test_restream_scenario_with_replay_file() {
    let dir = tempfile::tempdir().unwrap();

    let replay_path = dir.path().join("detections.jsonl");
    let mut replay = fs::File::create(&replay_path).unwrap();
    writeln!(
        replay,
        r#"[{{"box":[10,10,50,50],"class_id":0,"label":"person","confidence":0.91}}]"#
    )
    .unwrap();
    writeln!(replay, "[]").unwrap();
    drop(replay);

    let csv_path = dir.path().join("detections.csv");
    let released = Arc::new(Mutex::new(false));
    let sink = Capture::default();

    let mut driver = PipelineDriver::new(
        StillSource {
            remaining: 2,
            next: 0,
            released: released.clone(),
        },
        ReplayDetector::open(&replay_path).unwrap(),
        sink.clone(),
        Some(DetectionLog::open(&csv_path).unwrap()),
        Annotator::new(None, LabelMap::default()),
        ColorTable::with_seed(2024),
    );
    let summary = driver.run().unwrap();

    assert_eq!(summary.frames_written, 2);
    assert_eq!(summary.detections_logged, 1);
    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(driver.state(), PipelineState::Stopped);
    assert!(*released.lock().unwrap());
    assert!(*sink.closed.lock().unwrap());

    let csv = fs::read_to_string(&csv_path).unwrap();
    assert_eq!(
        csv,
        "Timestamp,Class,Coordinates,Confidence\n00:00:00:00,person,\"[10,10,50,50]\",91.00%\n"
    );

    // 第一帧画了 2 像素宽的框, 第二帧原样输出
    let frames = sink.frames.lock().unwrap();
    let color = driver.colors().get("person").unwrap().0;
    assert_eq!(pixel(&frames[0], 100, 10, 30), color);
    assert_eq!(pixel(&frames[0], 100, 11, 30), color);
    assert_eq!(pixel(&frames[0], 100, 12, 30), [0, 0, 0]);
    assert!(frames[1].iter().all(|&b| b == 0));
}

#[test]
fn test_log_open_failure_surfaces_before_any_frame() {
    let err = DetectionLog::open("/nonexistent/dir/detections.csv").err().unwrap();
    assert!(matches!(err, PipelineError::LogOpen { .. }));
    assert_eq!(err.stage().name(), "log");
}

#[test]
fn test_replay_detector_runs_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.jsonl");
    fs::write(
        &path,
        "[{\"box\":[1,2,3,4],\"label\":\"car\",\"confidence\":0.5}]\n",
    )
    .unwrap();

    let mut detector = ReplayDetector::open(&path).unwrap();
    let frame = Frame::new(0, RgbImage::new(4, 4));
    let first = detector.detect(&frame).unwrap();
    assert_eq!(
        first,
        vec![Detection::new(BBox::new(1.0, 2.0, 3.0, 4.0), 0, "car", 0.5)]
    );
    assert!(detector.detect(&frame).unwrap().is_empty());
}
