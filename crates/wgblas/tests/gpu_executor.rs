//! The executor on a wgpu device. Skipped when no adapter is available.

use approx::assert_relative_eq;
use nalgebra::DVector;
use wgblas::blas1::{asum, axpy, dot};
use wgblas::wgblas_core::{Device, Queue};
use wgblas::{Executor, ExecutorConfig, FusionLevel, GpuDevice, VectorView};

#[futures_test::test]
#[serial_test::serial]
async fn gpu_blas1() {
    let Ok(gpu) = GpuDevice::new().await else {
        return;
    };

    const LEN: usize = 50_000;
    let x = DVector::<f32>::new_random(LEN) * 2.0 - DVector::repeat(LEN, 1.0);
    let y = DVector::<f32>::new_random(LEN);
    let gpu_x = gpu.create_buffer(x.as_slice());
    let gpu_y = gpu.create_buffer(y.as_slice());
    let gpu_out = gpu.create_buffer(&[0.0f32; 2]);

    let config = ExecutorConfig::default().fusion_level(FusionLevel::Four);
    let ex = Executor::with_config(&gpu, config);
    let (xv, yv) = (VectorView::from(&gpu_x), VectorView::from(&gpu_y));
    axpy(&ex, 0.5, xv, yv).unwrap();
    asum(&ex, yv, VectorView::new(&gpu_out, 0, 1, 1), None).unwrap();
    dot(&ex, xv, yv, VectorView::new(&gpu_out, 1, 1, 1), None).unwrap();
    ex.wait().unwrap();

    let expected_y = &y + &x * 0.5;
    let result_y = DVector::from(gpu.read(&gpu_y).await.unwrap());
    assert_relative_eq!(result_y, expected_y, epsilon = 1.0e-5);

    let out = gpu.read(&gpu_out).await.unwrap();
    assert_relative_eq!(out[0], expected_y.lp_norm(1), max_relative = 1.0e-3);
    assert_relative_eq!(out[1], x.dot(&expected_y), max_relative = 1.0e-3);
    assert!(gpu.limits().reduction_workgroup_size.is_power_of_two());
}
