// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Benchmark net for SqrDiffMean: random inputs, warm-up, timed runs and an
//! explicit device sync.

use rand::Rng;
use stm_config::rng_from_optional;
use stm_ops::{
    DeviceBinding, DeviceKind, OpError, OperatorDef, OperatorDispatcher, SqrDiffMeanOp, Workspace,
    SQR_DIFF_MEAN,
};
use stm_tensor::{to_device_native, DType, DataFormat, Tensor};
use tracing::debug;

/// Untimed runs before measurement.
pub const WARM_UP_ITERS: usize = 5;

pub const INPUT: &str = "Input";
pub const BIAS: &str = "Input1";
pub const OUTPUT: &str = "Output";

/// One `N x C x H x W` benchmark shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BenchCase {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl BenchCase {
    pub const fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
        }
    }

    /// Elements touched by one run.
    pub const fn elements(&self) -> u64 {
        (self.batch * self.channels * self.height * self.width) as u64
    }

    pub const fn bytes(&self, dtype: DType) -> u64 {
        self.elements() * dtype.size_of() as u64
    }

    pub fn label(&self) -> String {
        format!(
            "{}x{}x{}x{}",
            self.batch, self.channels, self.height, self.width
        )
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch, self.height, self.width, self.channels]
    }

    pub fn bias_shape(&self) -> [usize; 4] {
        [self.batch, 1, 1, self.channels]
    }
}

pub const CASES: [BenchCase; 5] = [
    BenchCase::new(1, 1, 512, 512),
    BenchCase::new(4, 3, 128, 128),
    BenchCase::new(4, 1, 512, 512),
    BenchCase::new(8, 64, 256, 256),
    BenchCase::new(1, 32, 480, 640),
];

fn random_nhwc(shape: [usize; 4], seed: Option<u64>, label: &str) -> Result<Tensor, OpError> {
    let mut rng = rng_from_optional(seed, label);
    let len = shape.iter().product::<usize>();
    let data = (0..len).map(|_| rng.gen::<f32>()).collect();
    Ok(Tensor::from_f32(shape.to_vec(), DataFormat::Nhwc, data)?)
}

/// A one-operator net bound to a device.
pub struct SqrDiffMeanNet {
    case: BenchCase,
    ws: Workspace,
    op: SqrDiffMeanOp,
}

impl SqrDiffMeanNet {
    /// Build the net with random `Input` / `Input1` tensors.
    ///
    /// CPU nets hold their inputs in NCHW, the CPU executor's planar layout.
    pub fn new(case: BenchCase, binding: DeviceBinding, seed: Option<u64>) -> Result<Self, OpError> {
        let kind = binding.kind();
        let mut input = random_nhwc(case.input_shape(), seed, "stm.bench.sqrdiff_mean.input")?;
        let mut bias = random_nhwc(
            case.bias_shape(),
            seed.map(|s| s.wrapping_add(1)),
            "stm.bench.sqrdiff_mean.bias",
        )?;
        if kind == DeviceKind::Cpu {
            input = to_device_native(&input, DataFormat::Nchw)?;
            bias = to_device_native(&bias, DataFormat::Nchw)?;
        }

        let mut ws = Workspace::new();
        ws.insert(INPUT, input);
        ws.insert(BIAS, bias);

        let def = OperatorDef::builder(SQR_DIFF_MEAN, "SqrDiffMeanBM")
            .input(INPUT)
            .input(BIAS)
            .output(OUTPUT)
            .finalize();
        let mut dispatcher = OperatorDispatcher::new();
        dispatcher.bind(binding)?;
        let op = SqrDiffMeanOp::new(def, dispatcher)?;
        debug!(case = %case.label(), device = %kind, "benchmark net ready");
        Ok(Self { case, ws, op })
    }

    pub fn case(&self) -> BenchCase {
        self.case
    }

    pub fn run_once(&mut self) -> Result<(), OpError> {
        self.op.run(&mut self.ws)
    }

    pub fn run(&mut self, iters: usize) -> Result<(), OpError> {
        for _ in 0..iters {
            self.run_once()?;
        }
        Ok(())
    }

    /// Run `iters` times, then wait for the device.
    pub fn warm_up(&mut self, iters: usize) -> Result<(), OpError> {
        self.run(iters)?;
        self.sync()
    }

    pub fn sync(&self) -> Result<(), OpError> {
        self.op.sync()
    }

    pub fn output(&self) -> Option<&Tensor> {
        self.ws.get(OUTPUT)
    }
}
