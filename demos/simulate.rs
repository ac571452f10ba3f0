//! Runs every workload scenario against every placement strategy and
//! prints the per-scenario reports side by side.

use fitpool::{Pool, PoolError, Simulator, Strategy};

const POOL_SIZE: usize = 2048;
const ITERATIONS: usize = 100;
const SEED: u64 = 0xF17_9001;

fn main() -> Result<(), PoolError> {
    env_logger::init();

    for strategy in Strategy::ALL {
        let mut pool = Pool::new(strategy, POOL_SIZE)?;
        let mut simulator = Simulator::new(ITERATIONS, SEED);

        println!("===== {} =====", strategy);
        for report in simulator.run_all(&mut pool)? {
            print!("{}", report);
        }
        println!();
    }

    Ok(())
}
