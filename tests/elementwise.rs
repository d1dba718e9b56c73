//! Integration tests for elementwise ufunc dispatch

mod common;

use common::{add_ufunc, create_cpu_client};
use ufunc_dispatch::prelude::*;
use ufunc_dispatch::ufunc::LaunchGeometry;

// ============================================================================
// Broadcasting (host path)
// ============================================================================

#[test]
fn test_host_broadcast_column_and_row() {
    let add = add_ufunc();
    let a = HostArray::host(&[1.0f32, 2.0, 3.0], &[3, 1]);
    let b = HostArray::host(&[10.0f32, 20.0], &[2]);

    let r = add
        .call(&[Operand::host(a), Operand::host(b)], CallOptions::new())
        .unwrap()
        .into_host()
        .unwrap();

    assert_eq!(r.shape(), &[3, 2]);
    assert_eq!(r.to_vec::<f32>(), vec![11.0, 21.0, 12.0, 22.0, 13.0, 23.0]);
}

#[test]
fn test_host_broadcast_outer_sum_grid() {
    let add = add_ufunc();
    for m in 1..=6usize {
        for n in 1..=6usize {
            let col: Vec<i32> = (0..m as i32).map(|i| 100 * i).collect();
            let row: Vec<i32> = (0..n as i32).collect();
            let a = HostArray::host(&col, &[m, 1]);
            let b = HostArray::host(&row, &[1, n]);

            let r = add
                .call(&[Operand::host(a), Operand::host(b)], CallOptions::new())
                .unwrap()
                .into_host()
                .unwrap();

            assert_eq!(r.shape(), &[m, n]);
            let got = r.to_vec::<i32>();
            for i in 0..m {
                for j in 0..n {
                    assert_eq!(got[i * n + j], col[i] + row[j], "({}, {}) in {}x{}", i, j, m, n);
                }
            }
        }
    }
}

#[test]
fn test_host_broadcast_with_scalar() {
    let add = add_ufunc();
    let a = HostArray::host(&[1i32, 2, 3, 4], &[2, 2]);

    let r = add
        .call(&[Operand::host(a), Operand::scalar(100i32)], CallOptions::new())
        .unwrap()
        .into_host()
        .unwrap();

    assert_eq!(r.shape(), &[2, 2]);
    assert_eq!(r.to_vec::<i32>(), vec![101, 102, 103, 104]);
}

#[test]
fn test_host_all_stretched_inputs_keep_broadcast_length() {
    let add = add_ufunc();
    let a = HostArray::host(&[2.0f32], &[1]).broadcast_to(&[4]).unwrap();
    let b = HostArray::host(&[3.0f32], &[1]).broadcast_to(&[4]).unwrap();

    let r = add
        .call(&[Operand::host(a), Operand::host(b)], CallOptions::new())
        .unwrap()
        .into_host()
        .unwrap();

    assert_eq!(r.shape(), &[4]);
    assert_eq!(r.to_vec::<f32>(), vec![5.0; 4]);
}

#[test]
fn test_host_stretched_matrix_and_scalar() {
    let add = add_ufunc();
    let a = HostArray::host(&[1i32], &[1, 1]).broadcast_to(&[2, 3]).unwrap();

    let r = add
        .call(&[Operand::host(a), Operand::scalar(1i32)], CallOptions::new())
        .unwrap()
        .into_host()
        .unwrap();

    assert_eq!(r.shape(), &[2, 3]);
    assert_eq!(r.to_vec::<i32>(), vec![2; 6]);
}

#[test]
fn test_device_all_stretched_inputs_keep_length() {
    let add = add_ufunc();
    let (client, _) = create_cpu_client();
    let a = HostArray::host(&[2.0f64], &[1]).broadcast_to(&[5]).unwrap();

    let r = add
        .call(
            &[Operand::device(a), Operand::scalar(0.5f64)],
            CallOptions::new().with_stream(client.clone()),
        )
        .unwrap()
        .into_device()
        .unwrap();

    assert_eq!(r.shape(), &[5]);
    assert_eq!(r.try_to_vec::<f64>(&client).unwrap(), vec![2.5; 5]);
}

#[test]
fn test_host_incompatible_shapes() {
    let add = add_ufunc();
    let a = HostArray::host(&[1.0f64, 2.0, 3.0], &[3]);
    let b = HostArray::host(&[1.0f64, 2.0], &[2]);

    let err = add
        .call(&[Operand::host(a), Operand::host(b)], CallOptions::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
}

#[test]
fn test_host_empty_input_skips_launch() {
    let add = add_ufunc();
    let (client, _) = create_cpu_client();
    let a = HostArray::host::<f32>(&[], &[0]);
    let b = HostArray::host::<f32>(&[], &[0]);

    let r = add
        .call(
            &[Operand::host(a), Operand::host(b)],
            CallOptions::new().with_stream(client.clone()),
        )
        .unwrap()
        .into_host()
        .unwrap();

    assert_eq!(r.shape(), &[0]);
    assert_eq!(client.launch_count(), 0);
}

// ============================================================================
// Caller-supplied output
// ============================================================================

#[test]
fn test_host_out_is_returned() {
    let add = add_ufunc();
    let out = HostArray::host(&[0.0f32; 6], &[2, 3]);
    let a = HostArray::host(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let b = HostArray::host(&[1.0f32, 1.0, 1.0], &[3]);
    let (a2, b2) = (a.clone(), b.clone());

    let r = add
        .call(
            &[Operand::host(a), Operand::host(b)],
            CallOptions::new().with_out(Array::Host(out.clone())),
        )
        .unwrap()
        .into_host()
        .unwrap();

    assert!(r.shares_storage(&out));
    assert_eq!(r.shape(), &[2, 3]);
    assert_eq!(out.to_vec::<f32>(), vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

    let fresh = add
        .call(
            &[Operand::host(a2), Operand::host(b2)],
            CallOptions::new(),
        )
        .unwrap()
        .into_host()
        .unwrap();
    assert!(!fresh.shares_storage(&out));
    assert_eq!(fresh.to_vec::<f32>(), out.to_vec::<f32>());
}

#[test]
fn test_host_out_too_small() {
    let add = add_ufunc();
    let out = HostArray::host(&[0.0f64; 2], &[2]);
    let a = HostArray::host(&[1.0f64, 2.0, 3.0], &[3]);
    let b = HostArray::host(&[1.0f64, 2.0, 3.0], &[3]);

    let err = add
        .call(
            &[Operand::host(a), Operand::host(b)],
            CallOptions::new().with_out(Array::Host(out)),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientCapacity {
            required: 3,
            available: 2
        }
    ));
}

#[test]
fn test_device_out_is_returned() {
    let add = add_ufunc();
    let (client, _) = create_cpu_client();
    let a = HostArray::host(&[1i32, 2, 3, 4], &[4]);
    let b = HostArray::host(&[10i32, 20, 30, 40], &[4]);
    let out = Tensor::<CpuRuntime>::try_empty(&[4], DType::I32, &client).unwrap();

    let r = add
        .call(
            &[Operand::device(a), Operand::device(b)],
            CallOptions::new()
                .with_stream(client.clone())
                .with_out(Array::Device(out.clone())),
        )
        .unwrap()
        .into_device()
        .unwrap();

    assert!(r.shares_storage(&out));
    assert_eq!(out.to_vec::<i32>(), vec![11, 22, 33, 44]);
}

// ============================================================================
// Device path
// ============================================================================

#[test]
fn test_device_scalar_operand_broadcasts() {
    let add = add_ufunc();
    let (client, _) = create_cpu_client();
    let a = HostArray::host(&[1.0f32, 2.0, 3.0], &[3]);

    let r = add
        .call(
            &[Operand::device(a), Operand::scalar(0.5f32)],
            CallOptions::new().with_stream(client.clone()),
        )
        .unwrap();

    assert!(r.is_device());
    assert_eq!(r.shape(), &[3]);
    let t = r.into_device().unwrap();
    assert_eq!(t.try_to_vec::<f32>(&client).unwrap(), vec![1.5, 2.5, 3.5]);
}

#[test]
fn test_device_rejects_multidimensional() {
    let add = add_ufunc();
    let a = HostArray::host(&[1.0f32; 4], &[2, 2]);
    let b = HostArray::host(&[1.0f32; 4], &[2, 2]);

    let err = add
        .call(&[Operand::device(a), Operand::device(b)], CallOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::NotOneDimensional { arg: 0, ndim: 2 }));
}

#[test]
fn test_device_rejects_length_mismatch() {
    let add = add_ufunc();
    let a = HostArray::host(&[1.0f32; 4], &[4]);
    let b = HostArray::host(&[1.0f32; 3], &[3]);

    let err = add
        .call(&[Operand::device(a), Operand::device(b)], CallOptions::new())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LengthMismatch {
            arg: 1,
            expected: 4,
            got: 3
        }
    ));
}

#[test]
fn test_max_blocksize_caps_threads_per_block() {
    let add = add_ufunc().with_max_blocksize(4);
    let (client, _) = create_cpu_client();
    let data: Vec<f64> = (0..10).map(f64::from).collect();
    let a = HostArray::host(&data, &[10]);
    let b = HostArray::host(&data, &[10]);

    let r = add
        .call(
            &[Operand::device(a), Operand::device(b)],
            CallOptions::new().with_stream(client.clone()),
        )
        .unwrap()
        .into_device()
        .unwrap();

    assert_eq!(
        client.launches(),
        vec![LaunchGeometry {
            blocks: 3,
            threads_per_block: 4
        }]
    );
    let expected: Vec<f64> = data.iter().map(|x| x * 2.0).collect();
    assert_eq!(r.to_vec::<f64>(), expected);
}

#[test]
fn test_kernel_thread_limit_bounds_geometry() {
    let table = KernelTable::new(1)
        .register(
            &[DType::F32],
            DType::F32,
            CpuKernel::unary(|x: f32| -x).with_max_threads(8),
        )
        .unwrap();
    let neg = UFuncDispatcher::new(table);
    let (client, _) = create_cpu_client();
    let a = HostArray::host(&[1.0f32; 20], &[20]);

    neg.call(
        &[Operand::device(a)],
        CallOptions::new().with_stream(client.clone()),
    )
    .unwrap();

    let launches = client.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].threads_per_block, 8);
    assert_eq!(launches[0].blocks, 3);
}

// ============================================================================
// Dtype lookup
// ============================================================================

#[test]
fn test_unsupported_dtypes_fail_before_any_work() {
    let add = add_ufunc();
    let (client, _) = create_cpu_client();
    let a = HostArray::host(&[1u8, 2, 3], &[3]);
    let b = HostArray::host(&[1u8, 2, 3], &[3]);

    let err = add
        .call(
            &[Operand::device(a), Operand::device(b)],
            CallOptions::new().with_stream(client.clone()),
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedType);
    assert_eq!(client.allocations(), 0);
    assert_eq!(client.launch_count(), 0);
}

#[test]
fn test_float_only_table_rejects_integers() {
    let table = KernelTable::new(2)
        .register(
            &[DType::F32, DType::F32],
            DType::F32,
            CpuKernel::binary(|a: f32, b: f32| a * b),
        )
        .unwrap();
    let mul = UFuncDispatcher::new(table);
    let (client, _) = create_cpu_client();
    let a = HostArray::host(&[1i32, 2], &[2]);
    let b = HostArray::host(&[3i32, 4], &[2]);

    let err = mul
        .call(
            &[Operand::host(a), Operand::host(b)],
            CallOptions::new().with_stream(client.clone()),
        )
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedDTypes { ref dtypes } if dtypes == &[DType::I32, DType::I32]));
    assert_eq!(client.allocations(), 0);
}

#[test]
fn test_output_dtype_comes_from_table() {
    let table = KernelTable::new(2)
        .register(
            &[DType::I32, DType::I32],
            DType::F64,
            CpuKernel::binary(|a: i32, b: i32| f64::from(a) / f64::from(b)),
        )
        .unwrap();
    let div = UFuncDispatcher::new(table);
    let a = HostArray::host(&[1i32, 3], &[2]);
    let b = HostArray::host(&[2i32, 4], &[2]);

    let r = div
        .call(&[Operand::host(a), Operand::host(b)], CallOptions::new())
        .unwrap();
    assert_eq!(r.dtype(), DType::F64);
    assert_eq!(r.into_host().unwrap().to_vec::<f64>(), vec![0.5, 0.75]);
}

// ============================================================================
// Keyword options
// ============================================================================

#[test]
fn test_unknown_keyword_rejected() {
    use ufunc_dispatch::ufunc::OptionValue;

    let (client, _) = create_cpu_client();
    let result = CallOptions::<CpuRuntime>::from_kwargs(vec![
        ("stream", OptionValue::Stream(client)),
        ("axis", OptionValue::Stream(create_cpu_client().0)),
    ]);
    match result {
        Err(Error::UnknownOption { name }) => assert_eq!(name, "axis"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("unknown keyword accepted"),
    }
}
