// 该文件是 Qianxun （千寻） 项目的一部分。
// src/engine/replay.rs - 回放推理引擎
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

//! 在主机上回放录制好的检测结果。
//!
//! 每次运行按固定层数逐步推进，输出回读需要若干次轮询才完成，
//! 用于在没有 NPU 的环境下驱动完整的调度流程。
//!
//! 数据格式：
//! ```json
//! { "frames": [ { "boxes": [[cx, cy, w, h], ...], "labels": [id, ...] } ] }
//! ```

use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::{COORD_OUTPUT, EngineError, InferenceEngine, LABEL_OUTPUT, OutputTensor, Progress};
use crate::{FromUrl, FromUrlWithScheme, tensor::Tensor};

const DEFAULT_LAYERS: usize = 120;
const DEFAULT_READBACK_TICKS: usize = 1;

/// 一帧录制的检测结果，坐标位于模型输入像素空间
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayFrame {
  pub boxes: Vec<[f32; 4]>,
  pub labels: Vec<i32>,
}

impl ReplayFrame {
  fn coords(&self) -> Option<Tensor> {
    let data = self.boxes.iter().flatten().copied().collect();
    Tensor::from_f32(&[self.boxes.len(), 4], data)
  }

  fn label_ids(&self) -> Option<Tensor> {
    Tensor::from_i32(&[self.labels.len()], self.labels.clone())
  }

  fn from_json(value: &Value) -> Result<Self, EngineError> {
    let invalid = |msg: &str| EngineError::ModelInvalid(msg.to_string());

    let boxes = value
      .get("boxes")
      .and_then(Value::as_array)
      .ok_or_else(|| invalid("缺少 boxes 字段"))?
      .iter()
      .map(|row| {
        let row = row.as_array().filter(|r| r.len() == 4).ok_or_else(|| invalid("box 必须是 4 个数"))?;
        let mut out = [0f32; 4];
        for (dst, src) in out.iter_mut().zip(row) {
          *dst = src.as_f64().ok_or_else(|| invalid("box 元素必须是数字"))? as f32;
        }
        Ok(out)
      })
      .collect::<Result<Vec<_>, EngineError>>()?;

    let labels = value
      .get("labels")
      .and_then(Value::as_array)
      .ok_or_else(|| invalid("缺少 labels 字段"))?
      .iter()
      .map(|v| v.as_i64().map(|id| id as i32).ok_or_else(|| invalid("label 必须是整数")))
      .collect::<Result<Vec<_>, EngineError>>()?;

    Ok(Self { boxes, labels })
  }
}

pub struct ReplayEngine {
  frames: Vec<ReplayFrame>,
  layers: usize,
  readback_ticks: usize,
  cursor: usize,
  finished: Option<ReplayFrame>,
}

pub struct ReplayRun {
  remaining: usize,
  frame: ReplayFrame,
}

pub struct ReplayOutput {
  tensor: Option<Tensor>,
  polls_left: usize,
  requested: bool,
}

impl FromUrlWithScheme for ReplayEngine {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngine {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut layers = DEFAULT_LAYERS;
    let mut readback_ticks = DEFAULT_READBACK_TICKS;
    for (k, v) in url.query_pairs() {
      let parsed = v
        .parse::<usize>()
        .map_err(|_| EngineError::ModelInvalid(format!("参数 {} 不是整数: {}", k, v)));
      match &*k {
        "layers" => layers = parsed?,
        "readback_ticks" => readback_ticks = parsed?,
        _ => {}
      }
    }

    info!("加载回放数据: {}", url.path());
    let bytes = std::fs::read(url.path())?;
    Ok(Self::from_json_bytes(&bytes, layers)?.with_readback_ticks(readback_ticks))
  }
}

impl ReplayEngine {
  pub fn new(frames: Vec<ReplayFrame>, layers: usize) -> Self {
    Self {
      frames,
      layers,
      readback_ticks: DEFAULT_READBACK_TICKS,
      cursor: 0,
      finished: None,
    }
  }

  pub fn with_readback_ticks(mut self, readback_ticks: usize) -> Self {
    self.readback_ticks = readback_ticks;
    self
  }

  pub fn from_json_bytes(bytes: &[u8], layers: usize) -> Result<Self, EngineError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let frames = match value.get("frames").unwrap_or(&value) {
      Value::Array(frames) => frames
        .iter()
        .map(ReplayFrame::from_json)
        .collect::<Result<Vec<_>, _>>()?,
      _ => return Err(EngineError::ModelInvalid("缺少 frames 数组".to_string())),
    };
    debug!("回放帧数: {}, 每次运行层数: {}", frames.len(), layers);
    Ok(Self::new(frames, layers))
  }
}

impl InferenceEngine for ReplayEngine {
  type Run = ReplayRun;
  type Output = ReplayOutput;

  fn begin_run(&mut self, input: &Tensor) -> Result<Self::Run, EngineError> {
    if input.rows() == 0 {
      return Err(EngineError::Fault("输入张量为空".to_string()));
    }
    let frame = if self.frames.is_empty() {
      ReplayFrame::default()
    } else {
      let frame = self.frames[self.cursor % self.frames.len()].clone();
      self.cursor = (self.cursor + 1) % self.frames.len();
      frame
    };
    self.finished = None;
    Ok(ReplayRun {
      remaining: self.layers,
      frame,
    })
  }

  fn step(&mut self, run: &mut Self::Run) -> Result<Progress, EngineError> {
    if run.remaining > 0 {
      run.remaining -= 1;
    }
    if run.remaining > 0 {
      return Ok(Progress::Pending);
    }
    if self.finished.is_none() {
      self.finished = Some(std::mem::take(&mut run.frame));
    }
    Ok(Progress::Complete)
  }

  fn peek_output(&mut self, index: usize) -> Result<Self::Output, EngineError> {
    let tensor = match (index, &self.finished) {
      (COORD_OUTPUT, Some(frame)) => frame.coords(),
      (LABEL_OUTPUT, Some(frame)) => frame.label_ids(),
      (COORD_OUTPUT | LABEL_OUTPUT, None) => None,
      _ => return Err(EngineError::OutputMissing(index)),
    };
    Ok(ReplayOutput {
      tensor,
      polls_left: self.readback_ticks,
      requested: false,
    })
  }

  fn release_outputs(&mut self) {
    self.finished = None;
  }

  /// 预热只检查输入，不消耗录制帧，也不留下输出
  fn run_blocking(&mut self, input: &Tensor) -> Result<(), EngineError> {
    if input.rows() == 0 {
      return Err(EngineError::Fault("输入张量为空".to_string()));
    }
    self.finished = None;
    debug!("回放引擎预热，跳过 {} 层", self.layers);
    Ok(())
  }
}

impl OutputTensor for ReplayOutput {
  fn has_backing_data(&self) -> bool {
    self.tensor.is_some()
  }

  fn request_readback(&mut self) -> Result<(), EngineError> {
    self.requested = true;
    Ok(())
  }

  fn is_readback_done(&mut self) -> Result<bool, EngineError> {
    if !self.requested {
      return Err(EngineError::Fault("尚未发起回读请求".to_string()));
    }
    if self.polls_left == 0 {
      return Ok(true);
    }
    self.polls_left -= 1;
    Ok(false)
  }

  fn readback_clone(&self) -> Result<Tensor, EngineError> {
    if !self.requested || self.polls_left > 0 {
      return Err(EngineError::Fault("回读尚未完成".to_string()));
    }
    self
      .tensor
      .clone()
      .ok_or_else(|| EngineError::Fault("输出没有数据".to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn input() -> Tensor {
    Tensor::from_f32(&[1, 1], vec![0.0]).unwrap()
  }

  #[test]
  fn parses_recorded_frames() {
    let json = br#"{"frames": [{"boxes": [[1, 2, 3, 4]], "labels": [7]}]}"#;
    let engine = ReplayEngine::from_json_bytes(json, 3).unwrap();
    assert_eq!(engine.frames[0].boxes, vec![[1.0, 2.0, 3.0, 4.0]]);
    assert_eq!(engine.frames[0].labels, vec![7]);
    assert!(ReplayEngine::from_json_bytes(br#"{"frames": [{"boxes": [[1]]}]}"#, 3).is_err());
  }

  #[test]
  fn outputs_appear_only_after_last_step() {
    let frame = ReplayFrame {
      boxes: vec![[10.0, 20.0, 5.0, 5.0]],
      labels: vec![2],
    };
    let mut engine = ReplayEngine::new(vec![frame], 3);
    let mut run = engine.begin_run(&input()).unwrap();
    assert!(!engine.peek_output(COORD_OUTPUT).unwrap().has_backing_data());
    assert_eq!(engine.step(&mut run).unwrap(), Progress::Pending);
    assert_eq!(engine.step(&mut run).unwrap(), Progress::Pending);
    assert_eq!(engine.step(&mut run).unwrap(), Progress::Complete);
    assert_eq!(engine.step(&mut run).unwrap(), Progress::Complete);

    let mut coords = engine.peek_output(COORD_OUTPUT).unwrap();
    coords.request_readback().unwrap();
    assert!(!coords.is_readback_done().unwrap());
    assert!(coords.is_readback_done().unwrap());
    assert_eq!(coords.readback_clone().unwrap().shape(), &[1, 4]);
    assert!(matches!(engine.peek_output(5), Err(EngineError::OutputMissing(5))));
  }

  fn one_row(label: i32) -> ReplayFrame {
    ReplayFrame {
      boxes: vec![[1.0, 1.0, 1.0, 1.0]],
      labels: vec![label],
    }
  }

  #[test]
  fn blocking_run_keeps_recording_position() {
    let mut engine = ReplayEngine::new(vec![one_row(3), one_row(4)], 10);
    engine.run_blocking(&input()).unwrap();
    assert!(!engine.peek_output(LABEL_OUTPUT).unwrap().has_backing_data());

    // 第一次真正的运行回放第 0 帧
    let mut run = engine.begin_run(&input()).unwrap();
    while engine.step(&mut run).unwrap() == Progress::Pending {}
    let mut labels = engine.peek_output(LABEL_OUTPUT).unwrap();
    labels.request_readback().unwrap();
    while !labels.is_readback_done().unwrap() {}
    assert_eq!(labels.readback_clone().unwrap().get_i32(0, 0), Some(3));
  }

  #[test]
  fn released_outputs_have_no_data() {
    let mut engine = ReplayEngine::new(vec![one_row(1)], 1);
    let mut run = engine.begin_run(&input()).unwrap();
    assert_eq!(engine.step(&mut run).unwrap(), Progress::Complete);
    assert!(engine.peek_output(COORD_OUTPUT).unwrap().has_backing_data());

    engine.release_outputs();
    assert!(!engine.peek_output(COORD_OUTPUT).unwrap().has_backing_data());
    assert!(!engine.peek_output(LABEL_OUTPUT).unwrap().has_backing_data());
  }
}
