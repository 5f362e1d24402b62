// 该文件是 Qianxun （千寻） 项目的一部分。
// src/scheduler.rs - 分帧推理调度器
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

//! 分帧推理调度器。
//!
//! 同一时刻最多只有一个推理任务。每次 `tick` 最多推进 `layers_per_tick`
//! 层计算图，之后依次异步回读坐标输出和标签输出，最后以单 tick 的
//! `Ready` 状态交出结果并回到 `Idle`。任何一次调用都不会阻塞宿主循环。

use image::{DynamicImage, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  codec::{self, CodecError},
  config::DetectionConfig,
  engine::{COORD_OUTPUT, EngineError, InferenceEngine, LABEL_OUTPUT, OutputTensor, Progress},
  frame::CameraFrame,
  tensor::Tensor,
};

#[derive(Error, Debug)]
pub enum SchedulerError {
  #[error("输入编码错误: {0}")]
  Codec(#[from] CodecError),
  #[error("推理引擎错误: {0}")]
  Engine(#[from] EngineError),
  #[error("已有推理任务在执行")]
  Busy,
}

/// 回读阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStage {
  Coord,
  Labels,
}

/// 推理任务失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
  /// 输出张量没有后端数据
  NoOutputData(OutputStage),
  /// 回读得到的张量行数为零
  EmptyOutput(OutputStage),
  /// 计算图执行或回读过程中出错
  EngineFault(String),
}

impl std::fmt::Display for FailureReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FailureReason::NoOutputData(stage) => write!(f, "NoOutputData({:?})", stage),
      FailureReason::EmptyOutput(stage) => write!(f, "EmptyOutput({:?})", stage),
      FailureReason::EngineFault(msg) => write!(f, "EngineFault({})", msg),
    }
  }
}

/// 一次推理任务的结果，由 `Ready` 状态交出恰好一次
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
  Done { coords: Tensor, labels: Tensor },
  Failed(FailureReason),
}

/// 调度器状态（对外只读视图）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
  Idle,
  Stepping,
  AwaitingCoord,
  AwaitingLabels,
  Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
  Started,
  /// 已有任务在执行，本次提交被忽略
  Busy,
}

enum Pull<O> {
  Unrequested,
  Waiting(O),
}

enum PullResult<O> {
  Pending(Pull<O>),
  Ready(Tensor),
}

enum JobStage<E: InferenceEngine> {
  Stepping(E::Run),
  AwaitingCoord(Pull<E::Output>),
  AwaitingLabels { coords: Tensor, pull: Pull<E::Output> },
  Ready(SchedulerEvent),
}

struct InferenceJob<E: InferenceEngine> {
  // 输入张量随任务一起释放
  _input: Tensor,
  stage: JobStage<E>,
}

pub struct IncrementalScheduler<E: InferenceEngine> {
  engine: E,
  input_width: u32,
  input_height: u32,
  channels: usize,
  layers_per_tick: usize,
  job: Option<InferenceJob<E>>,
  model_loaded: bool,
  jobs_finished: u64,
}

impl<E: InferenceEngine> IncrementalScheduler<E> {
  pub fn new(engine: E, config: &DetectionConfig) -> Self {
    Self {
      engine,
      input_width: config.input_width,
      input_height: config.input_height,
      channels: config.channels,
      layers_per_tick: config.layers_per_tick.max(1),
      job: None,
      model_loaded: false,
      jobs_finished: 0,
    }
  }

  /// 用空白输入同步执行一次推理，把模型加载进内存
  pub fn warm_up(&mut self) -> Result<(), SchedulerError> {
    if self.job.is_some() {
      return Err(SchedulerError::Busy);
    }
    info!("预热模型: {}x{}", self.input_width, self.input_height);
    let blank = DynamicImage::ImageRgb8(RgbImage::new(self.input_width, self.input_height));
    let input = codec::encode_image(&blank, self.input_width, self.input_height, self.channels)?;
    self.engine.run_blocking(&input)?;
    self.model_loaded = true;
    info!("模型预热完成");
    Ok(())
  }

  pub fn is_model_loaded(&self) -> bool {
    self.model_loaded
  }

  pub fn is_running(&self) -> bool {
    self.job.is_some()
  }

  pub fn state(&self) -> SchedulerState {
    match &self.job {
      None => SchedulerState::Idle,
      Some(job) => match job.stage {
        JobStage::Stepping(_) => SchedulerState::Stepping,
        JobStage::AwaitingCoord(_) => SchedulerState::AwaitingCoord,
        JobStage::AwaitingLabels { .. } => SchedulerState::AwaitingLabels,
        JobStage::Ready(_) => SchedulerState::Ready,
      },
    }
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  /// 提交一帧图像。只在空闲时生效，否则忽略。
  pub fn submit(&mut self, frame: &CameraFrame) -> Result<Submission, CodecError> {
    if self.job.is_some() {
      debug!("推理任务执行中，忽略第 {} 帧", frame.index);
      return Ok(Submission::Busy);
    }

    let input = codec::encode(frame, self.input_width, self.input_height, self.channels)?;
    let stage = match self.engine.begin_run(&input) {
      Ok(run) => JobStage::Stepping(run),
      Err(e) => Self::fault(e),
    };
    debug!("开始推理第 {} 帧", frame.index);
    self.job = Some(InferenceJob {
      _input: input,
      stage,
    });
    Ok(Submission::Started)
  }

  /// 推进一个调度周期。`Ready` 状态下交出结果并回到 `Idle`。
  pub fn tick(&mut self) -> Option<SchedulerEvent> {
    let InferenceJob { _input, stage } = self.job.take()?;

    let stage = match stage {
      JobStage::Ready(event) => {
        self.engine.release_outputs();
        self.jobs_finished += 1;
        debug!("第 {} 个推理任务结束", self.jobs_finished);
        return Some(event);
      }
      JobStage::Stepping(run) => self.step_graph(run),
      JobStage::AwaitingCoord(pull) => {
        match self.poll_output(pull, COORD_OUTPUT, OutputStage::Coord) {
          Ok(PullResult::Pending(pull)) => JobStage::AwaitingCoord(pull),
          Ok(PullResult::Ready(coords)) => {
            debug!("坐标输出就绪: {} 行", coords.rows());
            JobStage::AwaitingLabels {
              coords,
              pull: Pull::Unrequested,
            }
          }
          Err(reason) => JobStage::Ready(SchedulerEvent::Failed(reason)),
        }
      }
      JobStage::AwaitingLabels { coords, pull } => {
        match self.poll_output(pull, LABEL_OUTPUT, OutputStage::Labels) {
          Ok(PullResult::Pending(pull)) => JobStage::AwaitingLabels { coords, pull },
          Ok(PullResult::Ready(labels)) => {
            debug!("标签输出就绪: {} 行", labels.rows());
            JobStage::Ready(SchedulerEvent::Done { coords, labels })
          }
          Err(reason) => JobStage::Ready(SchedulerEvent::Failed(reason)),
        }
      }
    };

    self.job = Some(InferenceJob { _input, stage });
    None
  }

  fn fault(e: EngineError) -> JobStage<E> {
    error!("推理任务出错: {}", e);
    JobStage::Ready(SchedulerEvent::Failed(FailureReason::EngineFault(
      e.to_string(),
    )))
  }

  fn step_graph(&mut self, mut run: E::Run) -> JobStage<E> {
    for _ in 0..self.layers_per_tick {
      match self.engine.step(&mut run) {
        Ok(Progress::Pending) => {}
        Ok(Progress::Complete) => {
          debug!("计算图执行完成");
          return JobStage::AwaitingCoord(Pull::Unrequested);
        }
        Err(e) => return Self::fault(e),
      }
    }
    JobStage::Stepping(run)
  }

  fn poll_output(
    &mut self,
    pull: Pull<E::Output>,
    index: usize,
    stage: OutputStage,
  ) -> Result<PullResult<E::Output>, FailureReason> {
    let fault = |e: EngineError| {
      error!("回读 {:?} 输出出错: {}", stage, e);
      FailureReason::EngineFault(e.to_string())
    };

    match pull {
      Pull::Unrequested => {
        let mut output = self.engine.peek_output(index).map_err(fault)?;
        if !output.has_backing_data() {
          error!("{:?} 输出没有数据", stage);
          return Err(FailureReason::NoOutputData(stage));
        }
        output.request_readback().map_err(fault)?;
        Ok(PullResult::Pending(Pull::Waiting(output)))
      }
      Pull::Waiting(mut output) => {
        if !output.is_readback_done().map_err(fault)? {
          return Ok(PullResult::Pending(Pull::Waiting(output)));
        }
        let tensor = output.readback_clone().map_err(fault)?;
        drop(output);

        if tensor.rows() == 0 {
          match stage {
            OutputStage::Coord => info!("本帧没有检测到物体"),
            OutputStage::Labels => warn!("坐标非空但标签输出为空"),
          }
          return Err(FailureReason::EmptyOutput(stage));
        }
        Ok(PullResult::Ready(tensor))
      }
    }
  }
}
