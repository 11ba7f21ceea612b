//! Memoized recurrences runnable from the command line

use clap::Subcommand;
use memocache::{Args, Memo, MemoConfig};
use tracing::debug;

use crate::error::{Result, ScenarioError};
use crate::report::Report;

/// Largest argument accepted; bounds the recursion depth
const MAX_N: u64 = 1_000;

/// Available recurrences
#[derive(Subcommand, Debug, Clone)]
pub enum Scenario {
    /// Greatest common divisor by recursive Euclid
    Gcd { a: u64, b: u64 },
    /// n! in u128, failing on overflow
    Factorial { n: u64 },
    /// n-th Fibonacci number in u128, failing on overflow
    Fib { n: u64 },
    /// Binomial coefficient C(n, k) by Pascal's rule
    Binomial { n: u64, k: u64 },
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Gcd { .. } => "gcd",
            Scenario::Factorial { .. } => "factorial",
            Scenario::Fib { .. } => "fib",
            Scenario::Binomial { .. } => "binomial",
        }
    }

    /// Run the recurrence `repeat` times against one fresh memo
    pub fn run(&self, repeat: usize) -> Result<Report> {
        if repeat == 0 {
            return Err(ScenarioError::InvalidInput(
                "repeat must be at least 1".to_string(),
            ));
        }

        match *self {
            Scenario::Gcd { a, b } => drive(
                self.name(),
                &gcd_memo(self.config()),
                (a, b),
                format!("gcd({}, {})", a, b),
                repeat,
            ),
            Scenario::Factorial { n } => {
                check_bound(n)?;
                drive(
                    self.name(),
                    &factorial_memo(self.config()),
                    (n,),
                    format!("factorial({})", n),
                    repeat,
                )
            }
            Scenario::Fib { n } => {
                check_bound(n)?;
                drive(
                    self.name(),
                    &fib_memo(self.config()),
                    (n,),
                    format!("fib({})", n),
                    repeat,
                )
            }
            Scenario::Binomial { n, k } => {
                check_bound(n)?;
                drive(
                    self.name(),
                    &binomial_memo(self.config()),
                    (n, k),
                    format!("binomial({}, {})", n, k),
                    repeat,
                )
            }
        }
    }

    fn config(&self) -> MemoConfig {
        MemoConfig::new()
            .with_name(self.name())
            .with_initial_capacity(64)
    }
}

fn check_bound(n: u64) -> Result<()> {
    if n > MAX_N {
        return Err(ScenarioError::InvalidInput(format!(
            "n = {} exceeds the limit of {}",
            n, MAX_N
        )));
    }
    Ok(())
}

fn drive<A, R>(
    scenario: &str,
    memo: &Memo<A, R, ScenarioError>,
    args: A,
    call: String,
    repeat: usize,
) -> Result<Report>
where
    A: Args + Clone,
    R: Clone + ToString,
{
    let value = memo.try_call(args.clone())?;
    for round in 1..repeat {
        memo.try_call(args.clone())?;
        debug!(round, hits = memo.stats().hits(), "repeat served");
    }
    Ok(Report::capture(scenario, call, value.to_string(), memo))
}

fn gcd_memo(config: MemoConfig) -> Memo<(u64, u64), u64, ScenarioError> {
    Memo::<(u64, u64), u64, ScenarioError>::try_with_config(config, |memo, (a, b)| {
        if b == 0 {
            Ok(a)
        } else {
            memo.try_call((b, a % b))
        }
    })
}

fn factorial_memo(config: MemoConfig) -> Memo<(u64,), u128, ScenarioError> {
    Memo::<(u64,), u128, ScenarioError>::try_with_config(config, |memo, (n,)| {
        if n <= 1 {
            return Ok(1);
        }
        memo.try_call((n - 1,))?
            .checked_mul(u128::from(n))
            .ok_or(ScenarioError::Overflow { op: "factorial", n })
    })
}

fn fib_memo(config: MemoConfig) -> Memo<(u64,), u128, ScenarioError> {
    Memo::<(u64,), u128, ScenarioError>::try_with_config(config, |memo, (n,)| {
        if n < 2 {
            return Ok(u128::from(n));
        }
        let a = memo.try_call((n - 1,))?;
        let b = memo.try_call((n - 2,))?;
        a.checked_add(b).ok_or(ScenarioError::Overflow { op: "fib", n })
    })
}

fn binomial_memo(config: MemoConfig) -> Memo<(u64, u64), u128, ScenarioError> {
    Memo::<(u64, u64), u128, ScenarioError>::try_with_config(config, |memo, (n, k)| {
        if k > n {
            return Ok(0);
        }
        if k == 0 || k == n {
            return Ok(1);
        }
        let a = memo.try_call((n - 1, k - 1))?;
        let b = memo.try_call((n - 1, k))?;
        a.checked_add(b)
            .ok_or(ScenarioError::Overflow { op: "binomial", n })
    })
}
