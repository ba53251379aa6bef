// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stm_backend_wgpu::sqrdiff_mean::{self, Dispatch, DispatchArgs, Params};
use stm_backend_wgpu::{buffer_to_image, image_to_buffer, DeviceImage, GpuContext, GpuError};
use stm_tensor::{DType, DataFormat, Dims, Tensor};

fn gpu() -> Option<GpuContext> {
    match GpuContext::request_default() {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

fn random(shape: [usize; 4], seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = shape.iter().product::<usize>();
    let data = (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    Tensor::from_f32(shape.to_vec(), DataFormat::Nhwc, data).unwrap()
}

fn reference(input: &Tensor, bias: &Tensor) -> Vec<f32> {
    let dims = input.desc().dims().unwrap();
    let x = input.as_f32().unwrap();
    let b = bias.as_f32().unwrap();
    let mut out = vec![0.0f32; dims.batch * dims.channels];
    for n in 0..dims.batch {
        for c in 0..dims.channels {
            let mut acc = 0.0f64;
            for p in 0..dims.spatial() {
                let d = (x[(n * dims.spatial() + p) * dims.channels + c]
                    - b[n * dims.channels + c]) as f64;
                acc += d * d;
            }
            out[n * dims.channels + c] = (acc / dims.spatial() as f64) as f32;
        }
    }
    out
}

fn run_kernel(ctx: &GpuContext, input: &Tensor, bias: &Tensor, dtype: DType) -> Tensor {
    let dims = input.desc().dims().unwrap();
    let pipelines = sqrdiff_mean::create_pipelines(ctx, dtype).unwrap();
    let input_image = buffer_to_image(ctx, input, dtype).unwrap();
    let bias_image = buffer_to_image(ctx, bias, dtype).unwrap();
    let out_dims = Dims::new(dims.batch, 1, 1, dims.channels);
    let output = DeviceImage::allocate(ctx, out_dims, dtype).unwrap();
    let params = sqrdiff_mean::upload_params(ctx, &Params::new(dims)).unwrap();
    let args = DispatchArgs {
        input: input_image.view(),
        bias: bias_image.view(),
        output: output.view(),
        params: &params,
    };
    assert!(sqrdiff_mean::dispatch(
        ctx.device(),
        ctx.queue(),
        &pipelines,
        &args,
        Dispatch::new(dims),
    ));
    image_to_buffer(ctx, &output).unwrap().cast(DType::F32).unwrap()
}

#[test]
fn image_upload_download_round_trips() {
    let Some(ctx) = gpu() else { return };
    let x = random([2, 3, 5, 6], 1);
    let image = buffer_to_image(&ctx, &x, DType::F32).unwrap();
    assert_eq!(image.image_shape().width, 10);
    assert_eq!(image.image_shape().height, 6);
    assert_eq!(image_to_buffer(&ctx, &image).unwrap(), x);
}

#[test]
fn kernel_matches_reference_f32() {
    let Some(ctx) = gpu() else { return };
    for (shape, seed) in [([1, 2, 2, 1], 3), ([2, 17, 19, 5], 4), ([1, 64, 64, 8], 5)] {
        let input = random(shape, seed);
        let bias = random([shape[0], 1, 1, shape[3]], seed + 100);
        let got = run_kernel(&ctx, &input, &bias, DType::F32);
        let want = reference(&input, &bias);
        for (g, w) in got.as_f32().unwrap().iter().zip(&want) {
            assert!((g - w).abs() <= w.abs() * 1e-4 + 1e-6, "{g} vs {w}");
        }
    }
}

#[test]
fn kernel_matches_reference_f16() {
    let Some(ctx) = gpu() else { return };
    let input = random([2, 16, 16, 4], 9);
    let bias = random([2, 1, 1, 4], 10);
    let got = run_kernel(&ctx, &input, &bias, DType::F16);
    let want = reference(&input, &bias);
    for (g, w) in got.as_f32().unwrap().iter().zip(&want) {
        assert!((g - w).abs() <= w.abs() * 1e-2 + 1e-3, "{g} vs {w}");
    }
}

#[test]
fn oversized_images_report_out_of_memory() {
    let Some(ctx) = gpu() else { return };
    let max = ctx.limits().max_texture_dimension_2d as usize;
    let dims = Dims::new(1, 1, max + 1, 4);
    let err = DeviceImage::allocate(&ctx, dims, DType::F32).unwrap_err();
    assert!(matches!(err, GpuError::OutOfMemory(_)), "{err:?}");
}

#[test]
fn shader_modules_do_not_outlive_their_context() {
    let input = random([1, 8, 8, 4], 21);
    let bias = random([1, 1, 1, 4], 22);
    let want = reference(&input, &bias);
    for _ in 0..2 {
        let Some(ctx) = gpu() else { return };
        assert!(ctx.shader_cache().is_empty());
        let got = run_kernel(&ctx, &input, &bias, DType::F32);
        assert_eq!(ctx.shader_cache().len(), 1);
        assert_eq!(ctx.clone().shader_cache().len(), 1);
        for (g, w) in got.as_f32().unwrap().iter().zip(&want) {
            assert!((g - w).abs() <= w.abs() * 1e-4 + 1e-6, "{g} vs {w}");
        }
    }
}

#[test]
fn params_buffer_is_allocated_under_error_scopes() {
    let Some(ctx) = gpu() else { return };
    let buffer = sqrdiff_mean::upload_params(&ctx, &Params::new(Dims::new(1, 2, 2, 4))).unwrap();
    assert_eq!(buffer.size(), std::mem::size_of::<Params>() as u64);
}
