use pebble::{compile, Function, InterpretResult, VirtualMachine};
use std::time::{Duration, Instant};

const ARITHMETIC: &str = r#"
let a = 1; let b = 2; let c = 3; let d = 4; let e = 5;
print (a + b) * (c + d) - e / (a + b * c - d) + a * b * c * d * e;
print -(-(a + b + c + d + e)) * (e - d - c - b - a) / 3;
"#;

const CALLS: &str = r#"
fun square(x) { return x * x; }
fun sum_of_squares(a, b, c) { return square(a) + square(b) + square(c); }
fun compute(n) { return sum_of_squares(n, n + 1, n + 2) - square(n); }
print compute(1) + compute(2) + compute(3) + compute(4) + compute(5) + compute(6) + compute(7) + compute(8) + compute(9) + compute(10);
"#;

const SCOPES: &str = r#"
{
    let a = 1;
    { let b = a + 1; { let c = b + 1; { let d = c + 1; { let e = d + 1; print a + b + c + d + e; } } } }
    { let a = 10; { let a = 100; print a; } print a; }
    print a;
}
"#;

const STRINGS: &str = r#"
fun wrap(s) { return "(" + s + ")"; }
print wrap(wrap(wrap(wrap(wrap("pebble")))));
"#;

const ITERATIONS: u32 = 1000;

fn time_compile(input: &str, iterations: u32) -> Option<(Duration, Function)> {
    let start = Instant::now();
    let mut function = None;
    for _ in 0..iterations {
        match compile(input) {
            Ok(compiled) => function = Some(compiled),
            Err(error) => {
                eprintln!("  Compile error: {}", error);
                return None;
            }
        }
    }
    function.map(|function| (start.elapsed(), function))
}

fn time_run(function: &Function, iterations: u32) -> Option<Duration> {
    let mut total_time = Duration::ZERO;
    for _ in 0..iterations {
        let mut vm = VirtualMachine::default();
        let function = function.clone();
        let start = Instant::now();
        let interpretation = vm.run_function(function);
        total_time += start.elapsed();
        if interpretation.result != InterpretResult::Ok {
            if let Some(error) = interpretation.error {
                eprintln!("  VM error: {}", error);
            }
            return None;
        }
    }
    Some(total_time)
}

fn benchmark(name: &str, input: &str) {
    println!("{}:", name);

    let (compile_time, function) = match time_compile(input, ITERATIONS) {
        Some(result) => result,
        None => return,
    };
    let per_iter = compile_time.as_secs_f64() / ITERATIONS as f64 * 1_000_000.0;
    println!("  Compile: {:.3}us/iter", per_iter);

    if let Some(run_time) = time_run(&function, ITERATIONS) {
        let per_iter = run_time.as_secs_f64() / ITERATIONS as f64 * 1_000_000.0;
        println!("  Run:     {:.3}us/iter", per_iter);
    }
    println!();
}

fn main() {
    println!("=== Compile vs run time ===");
    println!("({} iterations per benchmark)\n", ITERATIONS);

    benchmark("Arithmetic", ARITHMETIC);
    benchmark("Function calls (40 calls)", CALLS);
    benchmark("Nested scopes", SCOPES);
    benchmark("String concatenation", STRINGS);
}
