// 该文件是 Qianxun （千寻） 项目的一部分。
// src/engine.rs - 推理引擎能力定义
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, tensor::Tensor};

/// 坐标输出在模型输出中的索引
pub const COORD_OUTPUT: usize = 0;
/// 标签 ID 输出在模型输出中的索引
pub const LABEL_OUTPUT: usize = 1;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理执行错误: {0}")]
  Fault(String),
  #[error("模型没有第 {0} 个输出")]
  OutputMissing(usize),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[cfg(feature = "engine_replay")]
  #[error("回放数据错误: {0}")]
  Replay(#[from] serde_json::Error),
}

/// 单步执行后的计算图进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
  /// 已执行一步，还有剩余步骤
  Pending,
  /// 没有剩余步骤
  Complete,
}

/// 可异步回读的模型输出
pub trait OutputTensor {
  /// 输出是否有后端数据
  fn has_backing_data(&self) -> bool;
  /// 发起非阻塞回读请求
  fn request_readback(&mut self) -> Result<(), EngineError>;
  /// 轮询回读是否完成
  fn is_readback_done(&mut self) -> Result<bool, EngineError>;
  /// 回读完成后复制出主机端张量
  fn readback_clone(&self) -> Result<Tensor, EngineError>;
}

/// 推理引擎：可同步运行，也可通过可恢复的运行状态逐步推进
pub trait InferenceEngine {
  /// 一次运行的可恢复状态
  type Run;
  type Output: OutputTensor;

  fn begin_run(&mut self, input: &Tensor) -> Result<Self::Run, EngineError>;
  fn step(&mut self, run: &mut Self::Run) -> Result<Progress, EngineError>;
  fn peek_output(&mut self, index: usize) -> Result<Self::Output, EngineError>;

  /// 任务结束后释放引擎持有的输出，之后 `peek_output` 不再有数据
  fn release_outputs(&mut self);

  /// 同步执行完整的计算图，不保留输出
  fn run_blocking(&mut self, input: &Tensor) -> Result<(), EngineError> {
    let mut run = self.begin_run(input)?;
    while self.step(&mut run)? == Progress::Pending {}
    self.release_outputs();
    Ok(())
  }
}

#[cfg(feature = "engine_replay")]
mod replay;
#[cfg(feature = "engine_replay")]
pub use self::replay::{ReplayEngine, ReplayFrame, ReplayOutput, ReplayRun};

#[cfg(feature = "rknn")]
mod rknn;
#[cfg(feature = "rknn")]
pub use self::rknn::{RknnEngine, RknnEngineBuilder, RknnOutput, RknnRun};

pub enum EngineWrapper {
  #[cfg(feature = "engine_replay")]
  Replay(ReplayEngine),
  #[cfg(feature = "rknn")]
  Rknn(RknnEngine),
}

pub enum RunWrapper {
  #[cfg(feature = "engine_replay")]
  Replay(ReplayRun),
  #[cfg(feature = "rknn")]
  Rknn(RknnRun),
}

pub enum OutputWrapper {
  #[cfg(feature = "engine_replay")]
  Replay(ReplayOutput),
  #[cfg(feature = "rknn")]
  Rknn(RknnOutput),
}

impl FromUrl for EngineWrapper {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "engine_replay")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ReplayEngine::SCHEME {
        return Ok(EngineWrapper::Replay(ReplayEngine::from_url(url)?));
      }
    }
    #[cfg(feature = "rknn")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RknnEngineBuilder::SCHEME {
        return Ok(EngineWrapper::Rknn(RknnEngineBuilder::from_url(url)?.build()?));
      }
    }
    Err(EngineError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InferenceEngine for EngineWrapper {
  type Run = RunWrapper;
  type Output = OutputWrapper;

  fn begin_run(&mut self, input: &Tensor) -> Result<Self::Run, EngineError> {
    match self {
      #[cfg(feature = "engine_replay")]
      EngineWrapper::Replay(engine) => engine.begin_run(input).map(RunWrapper::Replay),
      #[cfg(feature = "rknn")]
      EngineWrapper::Rknn(engine) => engine.begin_run(input).map(RunWrapper::Rknn),
    }
  }

  fn step(&mut self, run: &mut Self::Run) -> Result<Progress, EngineError> {
    match (self, run) {
      #[cfg(feature = "engine_replay")]
      (EngineWrapper::Replay(engine), RunWrapper::Replay(run)) => engine.step(run),
      #[cfg(feature = "rknn")]
      (EngineWrapper::Rknn(engine), RunWrapper::Rknn(run)) => engine.step(run),
      #[allow(unreachable_patterns)]
      _ => Err(EngineError::Fault("运行状态与引擎不匹配".to_string())),
    }
  }

  fn peek_output(&mut self, index: usize) -> Result<Self::Output, EngineError> {
    match self {
      #[cfg(feature = "engine_replay")]
      EngineWrapper::Replay(engine) => engine.peek_output(index).map(OutputWrapper::Replay),
      #[cfg(feature = "rknn")]
      EngineWrapper::Rknn(engine) => engine.peek_output(index).map(OutputWrapper::Rknn),
    }
  }

  fn release_outputs(&mut self) {
    match self {
      #[cfg(feature = "engine_replay")]
      EngineWrapper::Replay(engine) => engine.release_outputs(),
      #[cfg(feature = "rknn")]
      EngineWrapper::Rknn(engine) => engine.release_outputs(),
    }
  }

  fn run_blocking(&mut self, input: &Tensor) -> Result<(), EngineError> {
    match self {
      #[cfg(feature = "engine_replay")]
      EngineWrapper::Replay(engine) => engine.run_blocking(input),
      #[cfg(feature = "rknn")]
      EngineWrapper::Rknn(engine) => engine.run_blocking(input),
    }
  }
}

impl OutputTensor for OutputWrapper {
  fn has_backing_data(&self) -> bool {
    match self {
      #[cfg(feature = "engine_replay")]
      OutputWrapper::Replay(output) => output.has_backing_data(),
      #[cfg(feature = "rknn")]
      OutputWrapper::Rknn(output) => output.has_backing_data(),
    }
  }

  fn request_readback(&mut self) -> Result<(), EngineError> {
    match self {
      #[cfg(feature = "engine_replay")]
      OutputWrapper::Replay(output) => output.request_readback(),
      #[cfg(feature = "rknn")]
      OutputWrapper::Rknn(output) => output.request_readback(),
    }
  }

  fn is_readback_done(&mut self) -> Result<bool, EngineError> {
    match self {
      #[cfg(feature = "engine_replay")]
      OutputWrapper::Replay(output) => output.is_readback_done(),
      #[cfg(feature = "rknn")]
      OutputWrapper::Rknn(output) => output.is_readback_done(),
    }
  }

  fn readback_clone(&self) -> Result<Tensor, EngineError> {
    match self {
      #[cfg(feature = "engine_replay")]
      OutputWrapper::Replay(output) => output.readback_clone(),
      #[cfg(feature = "rknn")]
      OutputWrapper::Rknn(output) => output.readback_clone(),
    }
  }
}
