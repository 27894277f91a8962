//! GEMV and GER through the public interface, on shifted sub-matrices of both storage orders.
//!
//! Results are summed on the device with single-group reductions and compared with sums computed
//! on the host, then compared element by element with sequential references: cells outside of the
//! shifted block must be left untouched. Failures are accumulated into a bitmask that must stay
//! zero.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgblas::blas2::{gemv_str, ger};
use wgblas::{
    add_reduction, assign, Executor, HostBuffer, HostDevice, MatrixView, Reduction, VectorView,
};

const ERROR_ALLOWED: f64 = 1.0e-8;

fn random_vector(seed: u64, len: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-10..=10) as f64).collect()
}

/// Sums `source` into `dest[0]` with one work-group of 256 work-items.
fn device_sum<'a>(
    ex: &Executor<'_, HostDevice>,
    dest: VectorView<'a, HostBuffer<f64>>,
    source: VectorView<'a, HostBuffer<f64>>,
) {
    let node: Reduction<'_, _> = add_reduction(dest, source).with_launch(256, 1);
    ex.reduce(&node, None).unwrap();
}

fn check(label: &str, res: f64, expected: f64, bit: u32) -> u32 {
    if ((res - expected) / res).abs() > ERROR_ALLOWED {
        eprintln!(
            "{label}: res = {res}, expected = {expected}, err = {}",
            res - expected
        );
        1 << bit
    } else {
        0
    }
}

/// Compares every element of `res` with the sequential reference `expected`.
fn check_elements(label: &str, res: &[f64], expected: &[f64], bit: u32) -> u32 {
    let mismatch = res
        .iter()
        .zip(expected)
        .position(|(r, e)| (r - e).abs() > ERROR_ALLOWED * e.abs().max(1.0));
    match mismatch {
        _ if res.len() != expected.len() => {
            eprintln!("{label}: {} elements, {} expected", res.len(), expected.len());
            1 << bit
        }
        Some(k) => {
            eprintln!("{label}: element {k}: res = {}, expected = {}", res[k], expected[k]);
            1 << bit
        }
        None => 0,
    }
}

fn run_blas2(row_major: bool, dim: usize, divisor: usize, shift: (usize, usize)) -> u32 {
    let (rows, cols) = (dim / divisor, dim * divisor);
    let (shift_r, shift_c) = shift;
    let (sub_rows, sub_cols) = (rows - shift_r, cols - shift_c);

    let m1 = random_vector(1, rows * cols);
    let x0 = random_vector(1, cols);
    let x1 = random_vector(2, cols);
    let y0 = random_vector(3, rows);
    let y1 = random_vector(4, rows);
    let index = |i: usize, j: usize| if row_major { cols * i + j } else { rows * j + i };
    let m = |i: usize, j: usize| m1[index(i, j)];

    // x2 = 0.5 * x1 + 2.5 * A^T * x0 over the shifted block; the tail of x1 is untouched.
    let mut ref_x2 = x1.clone();
    for (j, x) in ref_x2.iter_mut().enumerate().take(sub_cols) {
        *x = 0.5 * x1[j]
            + (0..sub_rows)
                .map(|i| 2.5 * m(i + shift_r, j + shift_c) * x0[i])
                .sum::<f64>();
    }
    // y2 = 1.5 * y1 + 2.0 * A * x0 over the shifted block.
    let mut ref_y2 = y1.clone();
    for (i, y) in ref_y2.iter_mut().enumerate().take(sub_rows) {
        *y = 1.5 * y1[i]
            + (0..sub_cols)
                .map(|j| 2.0 * m(i + shift_r, j + shift_c) * x0[j])
                .sum::<f64>();
    }
    // m0 = m1 + 3.0 * y0 * x0^T over the shifted block; cells outside of it keep their value.
    let mut ref_m0 = m1.clone();
    for i in 0..sub_rows {
        for j in 0..sub_cols {
            ref_m0[index(i + shift_r, j + shift_c)] += 3.0 * y0[i] * x0[j];
        }
    }
    let add_x: f64 = ref_x2.iter().sum();
    let add_y: f64 = ref_y2.iter().sum();
    let add_m: f64 = ref_m0.iter().sum();

    let device = HostDevice::new();
    let ex = Executor::new(&device);
    let b_m0 = HostBuffer::<f64>::zeros((rows * cols) as u32);
    let b_m1 = HostBuffer::from_slice(&m1);
    let b_x0 = HostBuffer::from_slice(&x0);
    let b_x1 = HostBuffer::from_slice(&x1);
    let b_x2 = HostBuffer::<f64>::zeros(cols as u32);
    let b_y0 = HostBuffer::from_slice(&y0);
    let b_y1 = HostBuffer::from_slice(&y1);
    let b_y2 = HostBuffer::<f64>::zeros(rows as u32);
    let b_r = HostBuffer::<f64>::zeros(3);

    let (rows, cols) = (rows as u32, cols as u32);
    let (sub_rows, sub_cols) = (sub_rows as u32, sub_cols as u32);
    let m0 = MatrixView::from_buffer(&b_m0, rows, cols, row_major);
    let block = m0.shifted(shift_r as u32, shift_c as u32);
    let x0_rows = VectorView::new(&b_x0, 0, 1, sub_rows);
    let x0_cols = VectorView::new(&b_x0, 0, 1, sub_cols);
    let y0_rows = VectorView::new(&b_y0, 0, 1, sub_rows);

    ex.execute(
        &assign(m0, MatrixView::from_buffer(&b_m1, rows, cols, row_major)),
        None,
    )
    .unwrap();

    ex.execute(&assign(VectorView::from(&b_x2), VectorView::from(&b_x1)), None)
        .unwrap();
    let x2 = VectorView::new(&b_x2, 0, 1, sub_cols);
    gemv_str(&ex, "Tr", 2.5, block, x0_rows, 0.5, x2).unwrap();

    ex.execute(&assign(VectorView::from(&b_y2), VectorView::from(&b_y1)), None)
        .unwrap();
    let y2 = VectorView::new(&b_y2, 0, 1, sub_rows);
    gemv_str(&ex, "No", 2.0, block, x0_cols, 1.5, y2).unwrap();

    ger(&ex, 3.0, y0_rows, x0_cols, block).unwrap();

    device_sum(&ex, VectorView::new(&b_r, 0, 1, 1), VectorView::from(&b_x2));
    device_sum(&ex, VectorView::new(&b_r, 1, 1, 1), VectorView::from(&b_y2));
    device_sum(&ex, VectorView::new(&b_r, 2, 1, 1), VectorView::from(&b_m0));
    ex.wait().unwrap();

    check("gemv Tr", b_r.get(0), add_x, 0)
        | check("gemv No", b_r.get(1), add_y, 1)
        | check("ger", b_r.get(2), add_m, 2)
        | check_elements("gemv Tr", &b_x2.to_vec(), &ref_x2, 3)
        | check_elements("gemv No", &b_y2.to_vec(), &ref_y2, 4)
        | check_elements("ger", &b_m0.to_vec(), &ref_m0, 5)
}

#[test]
fn blas2_row_major() {
    assert_eq!(run_blas2(true, 1200, 2, (0, 0)), 0);
}

#[test]
fn blas2_row_major_shifted() {
    assert_eq!(run_blas2(true, 1200, 2, (3, 5)), 0);
}

#[test]
fn blas2_column_major() {
    assert_eq!(run_blas2(false, 1200, 2, (0, 0)), 0);
}

#[test]
fn blas2_column_major_shifted() {
    assert_eq!(run_blas2(false, 1200, 2, (3, 5)), 0);
}

#[test]
fn blas2_square_column_major() {
    assert_eq!(run_blas2(false, 1200, 1, (0, 0)), 0);
}

#[test]
fn gemv_rejects_invalid_transpose() {
    let device = HostDevice::new();
    let ex = Executor::new(&device);
    let a = HostBuffer::<f64>::zeros(4);
    let x = HostBuffer::<f64>::zeros(2);
    let a = MatrixView::from_buffer(&a, 2, 2, true);
    let x = VectorView::from(&x);

    assert!(gemv_str(&ex, "Q", 1.0, a, x, 0.0, x).is_err());
}
