//! Correctness harness: run a GEMM variant and the reference side by side.
//!
//! Every case is checked bit for bit. The result shift is not given but
//! found by bisection over `[0, 32]`: the first try is the midpoint, and
//! while the reference saturates more than 1/16th of the outputs to 0
//! (shift too large) or to 255 (shift too small) the interval is halved
//! toward the better side. That keeps some saturation in every case
//! without letting it swamp the output.
//!
//! The `lowp-gemm-test` binary runs [`run_all`]; integration tests call
//! the individual pieces.

use std::fmt;

use log::debug;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro128PlusPlus;
use thiserror::Error;

use crate::blocked::single_thread::single_thread_gemm;
use crate::context::GemmContext;
use crate::eight_bit_int_gemm::try_eight_bit_int_gemm;
use crate::error::GemmError;
use crate::kernels::reference::ReferenceKernel;
use crate::kernels::{
    CellFormat, Kernel, KernelFormat, KernelSideFormat, default_kernel_for_gemm,
    default_kernel_for_gemv,
};
use crate::matrix::reference::{ReferenceContext, reference_gemm};
use crate::matrix::{MapOrder, Matrix, MatrixView};
use crate::params::QuantizationParams;
use crate::threaded::multi_thread::multi_thread_gemm;
use crate::try_gemm;
use WhatParamsToTest::{AllCombos, OnlyGenericCase};

/// Largest number of mismatching coefficients listed in a report.
const MAX_BAD_COEFFS: usize = 20;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Gemm(#[from] GemmError),

    #[error("{0}")]
    Mismatch(CaseFailure),
}

/// Where a variant disagreed with the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFailure {
    pub case: String,
    pub max_diff: i32,
    pub count_diff: usize,
    /// (row, col, expected, got), column by column.
    pub bad_coeffs: Vec<(usize, usize, u8, u8)>,
}

impl CaseFailure {
    fn compare(case: String, got: &Matrix<u8>, expected: &Matrix<u8>) -> Self {
        let mut failure = Self {
            case,
            max_diff: 0,
            count_diff: 0,
            bad_coeffs: Vec::new(),
        };
        for c in 0..got.cols() {
            for r in 0..got.rows() {
                let (a, b) = (got.get(r, c), expected.get(r, c));
                if a != b {
                    failure.count_diff += 1;
                    failure.max_diff = failure.max_diff.max((a as i32 - b as i32).abs());
                    if failure.bad_coeffs.len() < MAX_BAD_COEFFS {
                        failure.bad_coeffs.push((r, c, b, a));
                    }
                }
            }
        }
        failure
    }
}

impl fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FAIL: {}", self.case)?;
        writeln!(f, "max difference: {}", self.max_diff)?;
        write!(f, "number of different places: {}", self.count_diff)?;
        for (r, c, expected, got) in &self.bad_coeffs {
            write!(f, "\nbad coeff: at ({}, {}), expected {}, got {}", r, c, expected, got)?;
        }
        Ok(())
    }
}

/// A GEMM entry point under test, behind one uniform signature.
pub trait GemmWrapper {
    fn name(&self) -> String;

    fn gemm(
        &self,
        context: &mut GemmContext,
        lhs: &MatrixView<'_, u8>,
        rhs: &MatrixView<'_, u8>,
        result: &mut Matrix<u8>,
        params: &QuantizationParams,
    ) -> Result<(), GemmError>;
}

/// [`single_thread_gemm`] with a fixed kernel.
pub struct SingleThreadWrapper<'k> {
    pub kernel: &'k dyn Kernel,
}

impl GemmWrapper for SingleThreadWrapper<'_> {
    fn name(&self) -> String {
        format!("SingleThreadGemm, Kernel: {}", self.kernel.name())
    }

    fn gemm(
        &self,
        context: &mut GemmContext,
        lhs: &MatrixView<'_, u8>,
        rhs: &MatrixView<'_, u8>,
        result: &mut Matrix<u8>,
        params: &QuantizationParams,
    ) -> Result<(), GemmError> {
        single_thread_gemm(context, self.kernel, lhs, rhs, &mut result.view_mut(), params)
    }
}

/// [`multi_thread_gemm`] with a fixed kernel.
pub struct MultiThreadWrapper<'k> {
    pub kernel: &'k dyn Kernel,
}

impl GemmWrapper for MultiThreadWrapper<'_> {
    fn name(&self) -> String {
        format!("MultiThreadGemm, Kernel: {}", self.kernel.name())
    }

    fn gemm(
        &self,
        context: &mut GemmContext,
        lhs: &MatrixView<'_, u8>,
        rhs: &MatrixView<'_, u8>,
        result: &mut Matrix<u8>,
        params: &QuantizationParams,
    ) -> Result<(), GemmError> {
        multi_thread_gemm(context, self.kernel, lhs, rhs, &mut result.view_mut(), params)
    }
}

/// The public [`try_gemm`] entry point.
pub struct PublicGemmWrapper;

impl GemmWrapper for PublicGemmWrapper {
    fn name(&self) -> String {
        "public Gemm".to_string()
    }

    fn gemm(
        &self,
        context: &mut GemmContext,
        lhs: &MatrixView<'_, u8>,
        rhs: &MatrixView<'_, u8>,
        result: &mut Matrix<u8>,
        params: &QuantizationParams,
    ) -> Result<(), GemmError> {
        try_gemm(context, lhs, rhs, &mut result.view_mut(), params)
    }
}

/// The legacy façade. Only the row-major LHS, column-major RHS and
/// column-major result combination maps onto its arguments.
pub struct EightBitIntGemmWrapper;

impl GemmWrapper for EightBitIntGemmWrapper {
    fn name(&self) -> String {
        "EightBitIntGemm".to_string()
    }

    fn gemm(
        &self,
        _context: &mut GemmContext,
        lhs: &MatrixView<'_, u8>,
        rhs: &MatrixView<'_, u8>,
        result: &mut Matrix<u8>,
        params: &QuantizationParams,
    ) -> Result<(), GemmError> {
        let orders = (lhs.order(), rhs.order(), result.order());
        if orders != (MapOrder::RowMajor, MapOrder::ColMajor, MapOrder::ColMajor) {
            return Err(GemmError::UnsupportedOrder(format!(
                "EightBitIntGemm needs RowMajor/ColMajor/ColMajor, got {:?}/{:?}/{:?}",
                orders.0, orders.1, orders.2
            )));
        }
        let ldc = result.stride();
        try_eight_bit_int_gemm(
            rhs.cols(),
            lhs.rows(),
            lhs.cols(),
            rhs.data(),
            params.rhs_offset,
            rhs.stride(),
            lhs.data(),
            params.lhs_offset,
            lhs.stride(),
            result.data_mut(),
            params.result_offset,
            params.result_mult_int,
            params.result_shift,
            ldc,
        )
    }
}

/// Fills a matrix with uniformly random bytes.
pub fn make_random(
    rng: &mut Xoshiro128PlusPlus,
    rows: usize,
    cols: usize,
    order: MapOrder,
) -> Matrix<u8> {
    let mut m = Matrix::new(rows, cols, order);
    rng.fill_bytes(m.data_mut());
    m
}

/// Checks one (lhs, rhs, offsets, multiplier) case, bisecting the shift.
#[allow(clippy::too_many_arguments)]
pub fn test_gemm_case(
    context: &mut GemmContext,
    wrapper: &dyn GemmWrapper,
    lhs: &Matrix<u8>,
    rhs: &Matrix<u8>,
    result: &mut Matrix<u8>,
    lhs_offset: i32,
    rhs_offset: i32,
    result_offset: i32,
    result_mult_int: i32,
) -> Result<(), HarnessError> {
    let (rows, depth, cols) = (lhs.rows(), lhs.cols(), rhs.cols());
    let (mut shift_min, mut shift_max) = (0, 32);

    loop {
        let mid = (shift_min + shift_max) / 2;
        let params = QuantizationParams::new(
            lhs_offset,
            rhs_offset,
            result_offset,
            result_mult_int,
            mid.clamp(1, 31),
        );

        wrapper.gemm(context, &lhs.view(), &rhs.view(), result, &params)?;

        let mut expected = Matrix::new(rows, cols, result.order());
        let mut reference = ReferenceContext::default();
        reference_gemm(
            &mut reference,
            &lhs.view(),
            &rhs.view(),
            &mut expected.view_mut(),
            &params,
        )?;

        let case = format!(
            "{}x{}x{}, {}, offsets {}/{}/{}, mult {}, shift {}",
            rows,
            depth,
            cols,
            wrapper.name(),
            lhs_offset,
            rhs_offset,
            result_offset,
            result_mult_int,
            params.result_shift
        );
        if *result != expected {
            return Err(HarnessError::Mismatch(CaseFailure::compare(case, result, &expected)));
        }
        println!("PASS: {}", case);

        if shift_min == shift_max {
            return Ok(());
        }
        let allowed = result.size() / 16;
        let (mut new_min, mut new_max) = (shift_min, shift_max);
        if reference.saturated_0_values > allowed {
            new_max = mid;
        }
        if reference.saturated_255_values > allowed {
            new_min = mid;
        }
        if (new_min, new_max) == (shift_min, shift_max) {
            return Ok(());
        }
        debug!(
            "saturation 0: {}, 255: {} (allowed {}), shift interval [{}, {}]",
            reference.saturated_0_values, reference.saturated_255_values, allowed, new_min, new_max
        );
        shift_min = new_min;
        shift_max = new_max;
    }
}

/// Which offset/multiplier combinations a shape is tested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhatParamsToTest {
    AllCombos,
    OnlyGenericCase,
}

/// (lhs_offset, rhs_offset, result_offset, result_mult_int); the last one
/// is the generic case.
pub const PARAM_COMBOS: [(i32, i32, i32, i32); 8] = [
    (0, 0, 0, 1),
    (10, 0, 0, 1),
    (0, 10, 0, 1),
    (0, 0, 10, 1),
    (0, 0, 0, 10),
    (10, 10, 10, 10),
    (256, 1, 17, 4),
    (-75, -91, 74980, 123),
];

/// Random row-major LHS, column-major RHS and column-major result of the
/// given shape, checked with every requested parameter combination.
pub fn test_gemm_shape(
    context: &mut GemmContext,
    wrapper: &dyn GemmWrapper,
    rng: &mut Xoshiro128PlusPlus,
    (rows, depth, cols): (usize, usize, usize),
    what: WhatParamsToTest,
) -> Result<(), HarnessError> {
    let lhs = make_random(rng, rows, depth, MapOrder::RowMajor);
    let rhs = make_random(rng, depth, cols, MapOrder::ColMajor);
    let mut result = Matrix::new(rows, cols, MapOrder::ColMajor);

    let combos = match what {
        WhatParamsToTest::AllCombos => &PARAM_COMBOS[..],
        WhatParamsToTest::OnlyGenericCase => &PARAM_COMBOS[PARAM_COMBOS.len() - 1..],
    };
    for &(lhs_offset, rhs_offset, result_offset, mult) in combos {
        test_gemm_case(
            context,
            wrapper,
            &lhs,
            &rhs,
            &mut result,
            lhs_offset,
            rhs_offset,
            result_offset,
            mult,
        )?;
    }
    Ok(())
}

/// General shapes: tiny, powers of two, odd sizes, large, and skinny.
pub const GEMM_SHAPES: &[((usize, usize, usize), WhatParamsToTest)] = &[
    ((1, 1, 1), AllCombos),
    ((2, 1, 1), AllCombos),
    ((1, 2, 1), AllCombos),
    ((1, 1, 2), AllCombos),
    ((2, 2, 2), AllCombos),
    ((3, 3, 3), AllCombos),
    ((4, 4, 4), AllCombos),
    ((5, 5, 5), AllCombos),
    ((6, 6, 6), AllCombos),
    ((3, 5, 7), AllCombos),
    ((7, 3, 5), AllCombos),
    ((5, 7, 3), AllCombos),
    ((8, 8, 8), AllCombos),
    ((16, 16, 16), AllCombos),
    ((32, 32, 32), AllCombos),
    ((64, 64, 64), AllCombos),
    ((128, 128, 128), AllCombos),
    ((17, 24, 31), AllCombos),
    ((37, 55, 73), AllCombos),
    ((57, 87, 117), AllCombos),
    ((93, 83, 73), AllCombos),
    ((109, 89, 99), AllCombos),
    ((78, 101, 82), AllCombos),
    ((512, 512, 512), OnlyGenericCase),
    ((1024, 1024, 1024), OnlyGenericCase),
    ((567, 2345, 123), OnlyGenericCase),
    ((100, 5000, 100), OnlyGenericCase),
    ((1, 1, 1000), OnlyGenericCase),
    ((1000, 1, 1), OnlyGenericCase),
    ((1, 1000, 1), OnlyGenericCase),
    ((1, 1000, 1000), OnlyGenericCase),
    ((1000, 1, 1000), OnlyGenericCase),
    ((1000, 1000, 1), OnlyGenericCase),
    ((777, 3456, 1), OnlyGenericCase),
    ((4567, 555, 1), OnlyGenericCase),
];

/// Single-column results.
pub const GEMV_SHAPES: &[(usize, usize, usize)] = &[
    (2, 2, 1),
    (3, 3, 1),
    (4, 4, 1),
    (5, 5, 1),
    (6, 6, 1),
    (3, 5, 1),
    (7, 3, 1),
    (5, 7, 1),
    (8, 8, 1),
    (32, 32, 1),
    (128, 128, 1),
    (321, 123, 1),
];

/// Shapes every individual kernel is run on.
pub const KERNEL_SHAPES: &[((usize, usize, usize), WhatParamsToTest)] = &[
    ((1, 1, 1), OnlyGenericCase),
    ((2, 2, 2), OnlyGenericCase),
    ((3, 3, 3), OnlyGenericCase),
    ((4, 4, 4), OnlyGenericCase),
    ((5, 5, 5), OnlyGenericCase),
    ((9, 11, 13), OnlyGenericCase),
    ((50, 50, 50), AllCombos),
    ((500, 500, 500), OnlyGenericCase),
    ((100, 5000, 100), OnlyGenericCase),
];

/// Scalar kernel formats with awkward cell shapes, to stress packing.
pub fn reference_kernel_formats() -> Result<Vec<KernelFormat>, GemmError> {
    let side = |width, depth, cells| KernelSideFormat::new(CellFormat::new(width, depth), cells);
    [
        (side(1, 1, 1), side(1, 1, 1)),
        (side(3, 4, 2), side(5, 4, 3)),
        (side(5, 3, 3), side(4, 3, 2)),
        (side(4, 3, 3), side(4, 3, 1)),
        (side(4, 3, 3), side(2, 3, 2)),
    ]
    .into_iter()
    .map(|(lhs, rhs)| KernelFormat::new(lhs, rhs))
    .collect()
}

pub fn test_gemm(
    context: &mut GemmContext,
    wrapper: &dyn GemmWrapper,
    rng: &mut Xoshiro128PlusPlus,
) -> Result<(), HarnessError> {
    for &(shape, what) in GEMM_SHAPES {
        test_gemm_shape(context, wrapper, rng, shape, what)?;
    }
    Ok(())
}

pub fn test_gemv(
    context: &mut GemmContext,
    wrapper: &dyn GemmWrapper,
    rng: &mut Xoshiro128PlusPlus,
) -> Result<(), HarnessError> {
    for &shape in GEMV_SHAPES {
        test_gemm_shape(context, wrapper, rng, shape, AllCombos)?;
    }
    Ok(())
}

/// Runs [`KERNEL_SHAPES`] through the multi-threaded path with `kernel`.
pub fn test_gemm_kernel(
    context: &mut GemmContext,
    kernel: &dyn Kernel,
    rng: &mut Xoshiro128PlusPlus,
) -> Result<(), HarnessError> {
    let wrapper = MultiThreadWrapper { kernel };
    for &(shape, what) in KERNEL_SHAPES {
        test_gemm_shape(context, &wrapper, rng, shape, what)?;
    }
    Ok(())
}

/// Thread budgets [`test_thread_counts`] repeats a product with.
pub const THREAD_COUNTS: &[usize] = &[1, 2, 4, 8];

/// Runs one shape through the multi-threaded path under each of
/// [`THREAD_COUNTS`], every run checked against the reference. The
/// context's own budget is restored afterwards.
pub fn test_thread_counts(
    context: &mut GemmContext,
    rng: &mut Xoshiro128PlusPlus,
    shape: (usize, usize, usize),
) -> Result<(), HarnessError> {
    let saved = context.max_threads();
    let wrapper = MultiThreadWrapper {
        kernel: default_kernel_for_gemm(),
    };
    let mut outcome = Ok(());
    for &threads in THREAD_COUNTS {
        context.set_max_threads(threads)?;
        debug!("{}x{}x{} with a budget of {} thread(s)", shape.0, shape.1, shape.2, threads);
        outcome = test_gemm_shape(context, &wrapper, rng, shape, OnlyGenericCase);
        if outcome.is_err() {
            break;
        }
    }
    context.set_max_threads(saved)?;
    outcome
}

/// The whole suite: internal and public interfaces on GEMM and GEMV
/// shapes, then every kernel on its own.
pub fn run_all(context: &mut GemmContext, seed: u64) -> Result<(), HarnessError> {
    let mut rng = Xoshiro128PlusPlus::seed_from_u64(seed);
    let gemm_kernel = default_kernel_for_gemm();
    let gemv_kernel = default_kernel_for_gemv();

    test_gemm(context, &SingleThreadWrapper { kernel: gemm_kernel }, &mut rng)?;
    test_gemm(context, &MultiThreadWrapper { kernel: gemm_kernel }, &mut rng)?;
    test_gemm(context, &PublicGemmWrapper, &mut rng)?;
    test_gemm(context, &EightBitIntGemmWrapper, &mut rng)?;

    test_gemv(context, &SingleThreadWrapper { kernel: gemv_kernel }, &mut rng)?;
    test_gemv(context, &MultiThreadWrapper { kernel: gemv_kernel }, &mut rng)?;
    test_gemv(context, &PublicGemmWrapper, &mut rng)?;
    test_gemv(context, &EightBitIntGemmWrapper, &mut rng)?;

    for format in reference_kernel_formats()? {
        let kernel = ReferenceKernel::new(format)?;
        test_gemm_kernel(context, &kernel, &mut rng)?;
    }

    #[cfg(target_arch = "x86_64")]
    {
        use crate::kernels::kernel_8x1::Avx2Kernel8x1Depth4;
        use crate::kernels::kernel_12x4::Avx2Kernel12x4Depth2;
        use crate::kernels::kernel_20x1::Avx2Kernel20x1Depth4;

        if let Some(kernel) = Avx2Kernel12x4Depth2::detect() {
            test_gemm_kernel(context, kernel, &mut rng)?;
        }
        if let Some(kernel) = Avx2Kernel20x1Depth4::detect() {
            test_gemm_kernel(context, kernel, &mut rng)?;
        }
        if let Some(kernel) = Avx2Kernel8x1Depth4::detect() {
            test_gemm_kernel(context, kernel, &mut rng)?;
        }
    }

    test_thread_counts(context, &mut rng, (1024, 1024, 1024))?;
    Ok(())
}
