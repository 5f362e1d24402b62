// 该文件是 Qianxun （千寻） 项目的一部分。
// src/engine/rknn.rs - RKNN NPU 推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use super::{COORD_OUTPUT, EngineError, InferenceEngine, LABEL_OUTPUT, OutputTensor, Progress};
use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{Tensor, TensorData},
};

// 检测模型需要坐标和标签两个输出
const RKNN_MIN_OUTPUTS: u32 = 2;
const BOX_FIELDS: usize = 4;

impl From<rknpu::Error> for EngineError {
  fn from(err: rknpu::Error) -> Self {
    EngineError::Fault(err.to_string())
  }
}

pub struct RknnEngineBuilder {
  model_path: String,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnEngineBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnEngineBuilder {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(RknnEngineBuilder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
    })
  }
}

impl RknnEngineBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<RknnEngine, EngineError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );
    RknnEngine::load(&model_data, self.flags)
  }
}

/// RKNN 引擎
///
/// NPU 上的计算图无法拆分，一次运行分为两步：绑定输入、执行推理。
/// 输出在执行后已位于主机内存，回读在第一次轮询时即完成。
pub struct RknnEngine {
  context: Context,
  outputs: Option<[Tensor; 2]>,
}

pub enum RknnRun {
  BindInput(Box<[u8]>),
  Execute,
  Done,
}

pub struct RknnOutput {
  tensor: Option<Tensor>,
  requested: bool,
}

impl RknnEngine {
  pub fn load(model_data: &[u8], flags: InitFlags) -> Result<Self, EngineError> {
    info!("创建 RKNN 推理上下文");
    let context = Context::new(model_data, flags)?;

    let num_outputs = context
      .num_outputs()
      .map_err(|e| EngineError::ModelInvalid(format!("无法获取输出数量: {}", e)))?;
    if num_outputs < RKNN_MIN_OUTPUTS {
      error!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        RKNN_MIN_OUTPUTS, num_outputs
      );
      return Err(EngineError::ModelInvalid(format!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        RKNN_MIN_OUTPUTS, num_outputs
      )));
    }
    debug!("模型输出数量: {}", num_outputs);

    Ok(Self {
      context,
      outputs: None,
    })
  }

  fn fetch_outputs(&self) -> Result<[Tensor; 2], EngineError> {
    let output = self.context.get_outputs()?;

    let coords = output.get_f32(COORD_OUTPUT)?.to_vec();
    let rows = coords.len() / BOX_FIELDS;
    let coords = Tensor::from_f32(&[rows, BOX_FIELDS], coords)
      .ok_or_else(|| EngineError::Fault("坐标输出长度不是 4 的倍数".to_string()))?;

    let labels: Vec<i32> = output
      .get_f32(LABEL_OUTPUT)?
      .iter()
      .map(|v| v.round() as i32)
      .collect();
    let labels = Tensor::from_i32(&[labels.len()], labels)
      .ok_or_else(|| EngineError::Fault("标签输出无效".to_string()))?;

    Ok([coords, labels])
  }
}

/// 将 `[1, C, H, W]` 的 [0, 1] 浮点张量转为 NHWC 字节
fn to_nhwc_bytes(input: &Tensor) -> Result<Box<[u8]>, EngineError> {
  let (channels, height, width) = match input.shape() {
    [1, c, h, w] => (*c, *h, *w),
    shape => return Err(EngineError::Fault(format!("输入形状不支持: {:?}", shape))),
  };
  let TensorData::Float(data) = input.data() else {
    return Err(EngineError::Fault("输入必须是浮点张量".to_string()));
  };

  let plane = height * width;
  let mut bytes = vec![0u8; channels * plane];
  for h in 0..height {
    for w in 0..width {
      for c in 0..channels {
        let value = data[c * plane + h * width + w];
        bytes[(h * width + w) * channels + c] = (value * 255.0).round().clamp(0.0, 255.0) as u8;
      }
    }
  }
  Ok(bytes.into_boxed_slice())
}

impl InferenceEngine for RknnEngine {
  type Run = RknnRun;
  type Output = RknnOutput;

  fn begin_run(&mut self, input: &Tensor) -> Result<Self::Run, EngineError> {
    self.outputs = None;
    Ok(RknnRun::BindInput(to_nhwc_bytes(input)?))
  }

  fn step(&mut self, run: &mut Self::Run) -> Result<Progress, EngineError> {
    match std::mem::replace(run, RknnRun::Done) {
      RknnRun::BindInput(bytes) => {
        debug!("设置模型输入");
        self
          .context
          .set_input(0, &bytes, TensorFormat::NHWC, TensorType::UInt8)?;
        *run = RknnRun::Execute;
        Ok(Progress::Pending)
      }
      RknnRun::Execute => {
        debug!("执行模型推理");
        self.context.run()?;
        self.outputs = Some(self.fetch_outputs()?);
        Ok(Progress::Complete)
      }
      RknnRun::Done => Ok(Progress::Complete),
    }
  }

  fn peek_output(&mut self, index: usize) -> Result<Self::Output, EngineError> {
    if index > LABEL_OUTPUT {
      return Err(EngineError::OutputMissing(index));
    }
    Ok(RknnOutput {
      tensor: self.outputs.as_ref().map(|outputs| outputs[index].clone()),
      requested: false,
    })
  }

  fn release_outputs(&mut self) {
    self.outputs = None;
  }
}

impl OutputTensor for RknnOutput {
  fn has_backing_data(&self) -> bool {
    self.tensor.is_some()
  }

  fn request_readback(&mut self) -> Result<(), EngineError> {
    self.requested = true;
    Ok(())
  }

  fn is_readback_done(&mut self) -> Result<bool, EngineError> {
    Ok(self.requested)
  }

  fn readback_clone(&self) -> Result<Tensor, EngineError> {
    self
      .tensor
      .clone()
      .ok_or_else(|| EngineError::Fault("输出没有数据".to_string()))
  }
}
