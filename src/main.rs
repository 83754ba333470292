//! Correctness runner: every GEMM entry point against the reference.
//!
//! Prints one PASS line per case to stdout, stops at the first failure
//! with a report of the differing coefficients (also on stdout) and exits
//! with status 1.

use std::io::{self, Write};
use std::process;

use lowp_gemm::GemmContext;
use lowp_gemm::eight_bit_int_gemm::free_persistent_resources;
use lowp_gemm::harness::{HarnessError, run_all};

const SEED: u64 = 0x5EED_0001;

fn main() {
    env_logger::init();

    let has_avx2 = is_avx2_available();
    println!("=== Quantized GEMM Correctness ===\n");
    println!("CPU Features: AVX2={}\n", has_avx2);

    let mut context = GemmContext::new();
    let outcome = run_all(&mut context, SEED);

    // The legacy entry point keeps a context of its own.
    free_persistent_resources();

    let status = report(&outcome, &mut io::stdout(), &mut io::stderr()).unwrap_or(1);
    process::exit(status);
}

/// Writes the outcome and returns the exit status.
///
/// A mismatch report belongs with the PASS lines before it; only the final
/// verdict and errors that stopped a case from running go to `err`.
fn report(
    outcome: &Result<(), HarnessError>,
    out: &mut impl Write,
    err: &mut impl Write,
) -> io::Result<i32> {
    match outcome {
        Ok(()) => {
            writeln!(err, "All tests passed.")?;
            Ok(0)
        }
        Err(HarnessError::Mismatch(failure)) => {
            writeln!(out, "{}", failure)?;
            out.flush()?;
            Ok(1)
        }
        Err(other) => {
            writeln!(err, "{}", other)?;
            Ok(1)
        }
    }
}

fn is_avx2_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowp_gemm::GemmError;
    use lowp_gemm::harness::CaseFailure;

    #[test]
    fn test_mismatch_report_goes_to_stdout() {
        let outcome = Err(HarnessError::Mismatch(CaseFailure {
            case: "3x3x3, SomeGemm".to_string(),
            max_diff: 2,
            count_diff: 1,
            bad_coeffs: vec![(1, 2, 40, 42)],
        }));
        let (mut out, mut err) = (Vec::new(), Vec::new());
        assert_eq!(report(&outcome, &mut out, &mut err).unwrap(), 1);

        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("FAIL: 3x3x3, SomeGemm\n"));
        assert!(out.contains("bad coeff: at (1, 2), expected 40, got 42"));
        assert!(err.is_empty());
    }

    #[test]
    fn test_verdict_and_errors_go_to_stderr() {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        assert_eq!(report(&Ok(()), &mut out, &mut err).unwrap(), 0);
        assert!(out.is_empty());
        assert_eq!(String::from_utf8(err).unwrap(), "All tests passed.\n");

        let outcome = Err(HarnessError::Gemm(GemmError::InvalidShift(0)));
        let (mut out, mut err) = (Vec::new(), Vec::new());
        assert_eq!(report(&outcome, &mut out, &mut err).unwrap(), 1);
        assert!(out.is_empty());
        assert!(!err.is_empty());
    }
}
