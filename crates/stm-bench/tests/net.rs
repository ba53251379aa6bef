// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use stm_bench::{BenchCase, SqrDiffMeanNet, CASES, OUTPUT, WARM_UP_ITERS};
use stm_ops::{DeviceBinding, DeviceKind};
use stm_tensor::{DType, DataFormat};

#[test]
fn case_matrix_and_throughput_metadata() {
    assert_eq!(CASES.len(), 5);
    let big = BenchCase::new(8, 64, 256, 256);
    assert!(CASES.contains(&big));
    assert_eq!(big.elements(), 8 * 64 * 256 * 256);
    assert_eq!(big.bytes(DType::F16), big.elements() * 2);
    assert_eq!(big.bytes(DType::F32), big.elements() * 4);
    assert_eq!(big.label(), "8x64x256x256");
    assert_eq!(big.input_shape(), [8, 256, 256, 64]);
    assert_eq!(big.bias_shape(), [8, 1, 1, 64]);
}

#[test]
fn cpu_net_warms_up_and_runs() {
    let case = BenchCase::new(2, 3, 8, 8);
    let mut net = SqrDiffMeanNet::new(case, DeviceBinding::Cpu, Some(7)).unwrap();
    assert!(net.output().is_none());
    net.warm_up(WARM_UP_ITERS).unwrap();
    net.run(3).unwrap();
    net.sync().unwrap();

    let out = net.output().unwrap();
    assert_eq!(out.shape(), &[2, 1, 1, 3]);
    assert_eq!(out.format(), DataFormat::Nhwc);
    // inputs are uniform in [0, 1), so every mean squared difference is below 1
    assert!(out.as_f32().unwrap().iter().all(|&v| (0.0..1.0).contains(&v)));
    assert_eq!(OUTPUT, "Output");
}

#[test]
fn seeded_nets_are_reproducible() {
    let case = BenchCase::new(1, 4, 6, 5);
    let mut a = SqrDiffMeanNet::new(case, DeviceBinding::Cpu, Some(11)).unwrap();
    let mut b = SqrDiffMeanNet::new(case, DeviceBinding::Cpu, Some(11)).unwrap();
    a.run(1).unwrap();
    b.run(1).unwrap();
    assert_eq!(a.output(), b.output());
    assert_eq!(a.case(), case);
}

#[test]
fn binding_kind_is_reported() {
    assert_eq!(DeviceBinding::Cpu.kind(), DeviceKind::Cpu);
}
