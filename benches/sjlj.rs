// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use criterion::measurement::Measurement;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sjlj::catch_long_jump;

fn save_return<M: Measurement + 'static>(name: &str, c: &mut Criterion<M>) {
    c.bench_function(name, |b| {
        b.iter(|| catch_long_jump(|_jp| black_box(0)));
    });
}

fn save_jump<M: Measurement + 'static>(name: &str, c: &mut Criterion<M>) {
    c.bench_function(name, |b| {
        b.iter(|| {
            catch_long_jump::<(), _>(|jp| {
                // Safety: jumping straight back to the live save point with
                // nothing in between
                unsafe { jp.long_jump(black_box(1)) }
            })
        });
    });
}

fn save_return_time(c: &mut Criterion) {
    save_return("save_return_time", c);
}
fn save_jump_time(c: &mut Criterion) {
    save_jump("save_jump_time", c);
}

criterion_group!(
    name = time;
    config = Criterion::default();
    targets = save_return_time, save_jump_time
);

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        use criterion_cycles_per_byte::CyclesPerByte;

        fn save_return_cycles(c: &mut Criterion<CyclesPerByte>) {
            save_return("save_return_cycles", c);
        }
        fn save_jump_cycles(c: &mut Criterion<CyclesPerByte>) {
            save_jump("save_jump_cycles", c);
        }

        criterion_group!(
            name = cycles;
            config = Criterion::default().with_measurement(CyclesPerByte);
            targets = save_return_cycles, save_jump_cycles
        );

        criterion_main!(cycles, time);
    } else {
        criterion_main!(time);
    }
}
