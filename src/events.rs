// 该文件是 Qianxun （千寻） 项目的一部分。
// src/events.rs - 检测事件输出
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fmt::Display;

use tracing::{info, warn};

/// 标记数量通知，`Reset` 与“本次没有放置”区分开
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerCount {
  Reset,
  Identified(usize),
}

impl MarkerCount {
  /// 界面使用的整数形式，重置为 -1
  pub fn as_i32(&self) -> i32 {
    match self {
      MarkerCount::Reset => -1,
      MarkerCount::Identified(n) => i32::try_from(*n).unwrap_or(i32::MAX),
    }
  }
}

impl Display for MarkerCount {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_i32())
  }
}

/// 面向界面的事件接收方
pub trait DetectionEvents {
  fn on_detection_count_changed(&mut self, count: usize);
  fn on_detection_error(&mut self, reason: &str);
  fn on_markers_identified(&mut self, count: MarkerCount);
}

/// 只写日志
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl DetectionEvents for TracingEvents {
  fn on_detection_count_changed(&mut self, count: usize) {
    info!("检测数量: {}", count);
  }

  fn on_detection_error(&mut self, reason: &str) {
    warn!("检测失败: {}", reason);
  }

  fn on_markers_identified(&mut self, count: MarkerCount) {
    match count {
      MarkerCount::Reset => info!("标记已重置"),
      MarkerCount::Identified(n) => info!("识别到 {} 个新标记", n),
    }
  }
}

impl<T: DetectionEvents> DetectionEvents for Option<T> {
  fn on_detection_count_changed(&mut self, count: usize) {
    if let Some(events) = self {
      events.on_detection_count_changed(count);
    }
  }

  fn on_detection_error(&mut self, reason: &str) {
    if let Some(events) = self {
      events.on_detection_error(reason);
    }
  }

  fn on_markers_identified(&mut self, count: MarkerCount) {
    if let Some(events) = self {
      events.on_markers_identified(count);
    }
  }
}

/// 同时分发给两个接收方
impl<A: DetectionEvents, B: DetectionEvents> DetectionEvents for (A, B) {
  fn on_detection_count_changed(&mut self, count: usize) {
    self.0.on_detection_count_changed(count);
    self.1.on_detection_count_changed(count);
  }

  fn on_detection_error(&mut self, reason: &str) {
    self.0.on_detection_error(reason);
    self.1.on_detection_error(reason);
  }

  fn on_markers_identified(&mut self, count: MarkerCount) {
    self.0.on_markers_identified(count);
    self.1.on_markers_identified(count);
  }
}

#[cfg(feature = "json_record")]
mod json_record;
#[cfg(feature = "json_record")]
pub use json_record::{EventError, JsonRecordEvents};

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  /// 记录收到的事件，供测试检查顺序
  #[derive(Debug, Clone, PartialEq, Eq)]
  pub(crate) enum Recorded {
    Count(usize),
    Error(String),
    Markers(i32),
  }

  #[derive(Debug, Default)]
  pub(crate) struct RecordingEvents {
    pub(crate) events: Vec<Recorded>,
  }

  impl DetectionEvents for RecordingEvents {
    fn on_detection_count_changed(&mut self, count: usize) {
      self.events.push(Recorded::Count(count));
    }

    fn on_detection_error(&mut self, reason: &str) {
      self.events.push(Recorded::Error(reason.to_string()));
    }

    fn on_markers_identified(&mut self, count: MarkerCount) {
      self.events.push(Recorded::Markers(count.as_i32()));
    }
  }

  #[test]
  fn reset_is_distinct_from_zero() {
    assert_eq!(MarkerCount::Reset.as_i32(), -1);
    assert_eq!(MarkerCount::Identified(0).as_i32(), 0);
    assert_eq!(MarkerCount::Reset.to_string(), "-1");
  }

  #[test]
  fn pair_and_option_forward_events() {
    let mut sink = (RecordingEvents::default(), Some(RecordingEvents::default()));
    sink.on_detection_count_changed(3);
    sink.on_markers_identified(MarkerCount::Reset);
    let mut none: Option<RecordingEvents> = None;
    none.on_detection_error("ignored");

    assert_eq!(sink.0.events, vec![Recorded::Count(3), Recorded::Markers(-1)]);
    assert_eq!(sink.1.map(|s| s.events), Some(vec![Recorded::Count(3), Recorded::Markers(-1)]));
  }

  #[derive(Clone, Default)]
  struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

  impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn detection_errors_log_at_warn_level() {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
      .with_writer(move || writer.clone())
      .with_ansi(false)
      .with_max_level(tracing::Level::WARN)
      .finish();
    tracing::subscriber::with_default(subscriber, || {
      TracingEvents.on_detection_count_changed(0);
      TracingEvents.on_detection_error("标签输出为空");
    });

    let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("WARN"));
    assert!(logs.contains("标签输出为空"));
    assert!(!logs.contains("检测数量"));
  }
}
