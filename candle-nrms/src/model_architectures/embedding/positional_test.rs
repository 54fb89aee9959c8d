//! Tests for sinusoidal positional encoding

use super::positional::*;
use candle_core::{DType, IndexOp, Tensor};
use rstest::*;
use serial_test::serial;

use crate::test_fixtures::fixtures::test_device;

/// Test the table follows sin on even and cos on odd dimensions
#[rstest]
#[serial]
fn test_positional_table_values() {
    let device = test_device();
    let pe = SinusoidalPositionalEncoding::new(10, 4, &device).unwrap();
    let table = pe.table().to_vec2::<f32>().unwrap();

    assert_eq!(table.len(), 10);
    assert_eq!(table[0], vec![0.0, 1.0, 0.0, 1.0]);

    let pos = 3f64;
    let freq = (2.0 * -(10000f64.ln()) / 4.0).exp();
    assert!((table[3][0] as f64 - pos.sin()).abs() < 1e-6);
    assert!((table[3][1] as f64 - pos.cos()).abs() < 1e-6);
    assert!((table[3][2] as f64 - (pos * freq).sin()).abs() < 1e-6);
    assert!((table[3][3] as f64 - (pos * freq).cos()).abs() < 1e-6);
}

/// Test forward adds the sliced table to every item
#[rstest]
#[serial]
fn test_positional_forward_adds_table() {
    let device = test_device();
    let pe = SinusoidalPositionalEncoding::new(8, 6, &device).unwrap();
    let xs = Tensor::zeros((3, 5, 6), DType::F32, &device).unwrap();

    let out = pe.forward(&xs).unwrap();
    assert_eq!(out.dims(), &[3, 5, 6]);
    let expected = pe.table().narrow(0, 0, 5).unwrap().to_vec2::<f32>().unwrap();
    for item in 0..3 {
        assert_eq!(out.i(item).unwrap().to_vec2::<f32>().unwrap(), expected);
    }
}

/// Test the encoding is deterministic across constructions
#[rstest]
#[serial]
fn test_positional_deterministic() {
    let device = test_device();
    let a = SinusoidalPositionalEncoding::new(12, 16, &device).unwrap();
    let b = SinusoidalPositionalEncoding::new(12, 16, &device).unwrap();
    assert_eq!(
        a.table().to_vec2::<f32>().unwrap(),
        b.table().to_vec2::<f32>().unwrap()
    );
    assert_eq!(a.max_len(), 12);
}

/// Test sequences longer than the table and mismatched widths are rejected
#[rstest]
#[case((1, 9, 4))]
#[case((1, 4, 6))]
#[serial]
fn test_positional_forward_rejects(#[case] shape: (usize, usize, usize)) {
    let device = test_device();
    let pe = SinusoidalPositionalEncoding::new(8, 4, &device).unwrap();
    let xs = Tensor::zeros(shape, DType::F32, &device).unwrap();
    assert!(pe.forward(&xs).is_err());
}
