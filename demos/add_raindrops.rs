//! Add raindrops to a single image.
//!
//! Usage:
//! ```sh
//! cargo run --example add_raindrops -- input.jpg output.jpg [seed]
//! ```

use std::env;
use std::process;

use rand::rngs::StdRng;
use rand::SeedableRng;
use raindrop_synth::{DropConfig, DropGenerator, FileJob};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <output> [seed]", args[0]);
        process::exit(1);
    }

    let seed = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);
    let generator = DropGenerator::new(DropConfig::default()).expect("default config is valid");
    let job = FileJob {
        input: args[1].clone().into(),
        output: args[2].clone().into(),
        label_input: None,
        label_output: None,
    };
    let result = generator.process_file(&job, &mut StdRng::seed_from_u64(seed));

    if result.success {
        println!("Done: {}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
        process::exit(1);
    }
}
