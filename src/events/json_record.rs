// 该文件是 Qianxun （千寻） 项目的一部分。
// src/events/json_record.rs - 事件记录到 JSON Lines 文件
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

use std::{
  fs::{File, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info};

use super::{DetectionEvents, MarkerCount};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum EventError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
}

/// 每个事件追加一行 JSON
pub struct JsonRecordEvents {
  path: PathBuf,
  writer: BufWriter<File>,
}

impl FromUrlWithScheme for JsonRecordEvents {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonRecordEvents {
  type Error = EventError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EventError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl JsonRecordEvents {
  /// 打开（或创建）记录文件，追加写入
  pub fn open(path: impl AsRef<Path>) -> Result<Self, EventError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("事件记录到: {}", path.display());
    Ok(Self {
      path,
      writer: BufWriter::new(file),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn record(&mut self, event: &str, value: Value) -> Result<(), EventError> {
    let line = json!({
      "time": Utc::now().to_rfc3339(),
      "event": event,
      "value": value,
    });
    serde_json::to_writer(&mut self.writer, &line)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    Ok(())
  }

  fn record_or_log(&mut self, event: &str, value: Value) {
    if let Err(e) = self.record(event, value) {
      error!("事件记录失败: {}", e);
    }
  }
}

impl DetectionEvents for JsonRecordEvents {
  fn on_detection_count_changed(&mut self, count: usize) {
    self.record_or_log("detection_count_changed", json!(count));
  }

  fn on_detection_error(&mut self, reason: &str) {
    self.record_or_log("detection_error", json!(reason));
  }

  fn on_markers_identified(&mut self, count: MarkerCount) {
    self.record_or_log("markers_identified", json!(count.as_i32()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn appends_one_line_per_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("events.jsonl");

    let mut events = JsonRecordEvents::open(&path).unwrap();
    events.on_detection_count_changed(4);
    events.on_detection_error("no output data");
    events.on_markers_identified(MarkerCount::Reset);
    drop(events);

    // 再次打开时继续追加
    let mut events = JsonRecordEvents::open(&path).unwrap();
    events.on_markers_identified(MarkerCount::Identified(2));
    drop(events);

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<Value> = text
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["event"], "detection_count_changed");
    assert_eq!(lines[0]["value"], 4);
    assert_eq!(lines[1]["value"], "no output data");
    assert_eq!(lines[2]["value"], -1);
    assert_eq!(lines[3]["value"], 2);
    assert!(lines[0]["time"].as_str().is_some());
  }

  #[test]
  fn url_scheme_is_checked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let url = url::Url::from_file_path(&path).unwrap();
    assert!(matches!(
      JsonRecordEvents::from_url(&url),
      Err(EventError::SchemeMismatch)
    ));

    let url = url::Url::parse(&format!("jsonl://{}", path.display())).unwrap();
    let events = JsonRecordEvents::from_url(&url).unwrap();
    assert_eq!(events.path(), path.as_path());
  }
}
