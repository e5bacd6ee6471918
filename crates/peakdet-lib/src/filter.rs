use crate::error::{PhysioError, PhysioResult};
use crate::signal::{Cutoffs, FilterMethod, PhysioRecord, ProcessingStep};
use std::f64::consts::PI;

pub const DEFAULT_ORDER: usize = 2;

/// Second-order section in transposed direct form II, normalised so `a0 == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Low,
    High,
}

impl Biquad {
    fn second_order(pass: Pass, fs: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / fs;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        let (b0, b1, b2) = match pass {
            Pass::Low => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            Pass::High => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn first_order(pass: Pass, fs: f64, cutoff: f64) -> Self {
        let k = (PI * cutoff / fs).tan();
        let norm = 1.0 / (1.0 + k);
        let (b0, b1) = match pass {
            Pass::Low => (k * norm, k * norm),
            Pass::High => (norm, -norm),
        };
        Self {
            b0,
            b1,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Delay-line state after a constant input `x` has settled.
    fn steady_state(&self, x: f64) -> [f64; 2] {
        let y = self.dc_gain() * x;
        [y - self.b0 * x, self.b2 * x - self.a2 * y]
    }

    fn run(&self, data: &mut [f64], state: [f64; 2]) {
        let [mut z1, mut z2] = state;
        for x in data.iter_mut() {
            let input = *x;
            let y = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * y + z2;
            z2 = self.b2 * input - self.a2 * y;
            *x = y;
        }
    }
}

fn butterworth(pass: Pass, order: usize, fs: f64, cutoff: f64) -> Vec<Biquad> {
    let mut sections = Vec::with_capacity(order / 2 + 1);
    for k in 0..order / 2 {
        let q = 1.0 / (2.0 * ((2 * k + 1) as f64 * PI / (2 * order) as f64).sin());
        sections.push(Biquad::second_order(pass, fs, cutoff, q));
    }
    if order % 2 == 1 {
        sections.push(Biquad::first_order(pass, fs, cutoff));
    }
    sections
}

fn check_cutoff(cutoff: f64, fs: f64) -> PhysioResult<()> {
    let nyquist = fs / 2.0;
    if !cutoff.is_finite() || cutoff <= 0.0 || cutoff >= nyquist {
        return Err(PhysioError::invalid_parameter(format!(
            "cutoff {cutoff} Hz must lie in (0, {nyquist}) Hz (Nyquist for fs={fs})"
        )));
    }
    Ok(())
}

/// Design the cascaded Butterworth sections for a filter request.
pub fn design(
    cutoffs: Cutoffs,
    method: FilterMethod,
    order: usize,
    fs: f64,
) -> PhysioResult<Vec<Biquad>> {
    if order == 0 {
        return Err(PhysioError::invalid_parameter("filter order must be >= 1"));
    }
    match (method, cutoffs) {
        (FilterMethod::Lowpass, Cutoffs::Single(fc)) => {
            check_cutoff(fc, fs)?;
            Ok(butterworth(Pass::Low, order, fs, fc))
        }
        (FilterMethod::Highpass, Cutoffs::Single(fc)) => {
            check_cutoff(fc, fs)?;
            Ok(butterworth(Pass::High, order, fs, fc))
        }
        (FilterMethod::Bandpass, Cutoffs::Band([lo, hi])) => {
            check_cutoff(lo, fs)?;
            check_cutoff(hi, fs)?;
            if lo >= hi {
                return Err(PhysioError::invalid_parameter(format!(
                    "bandpass cutoffs must be increasing, got [{lo}, {hi}]"
                )));
            }
            let mut sections = butterworth(Pass::High, order, fs, lo);
            sections.extend(butterworth(Pass::Low, order, fs, hi));
            Ok(sections)
        }
        (FilterMethod::Bandpass, Cutoffs::Single(_)) => Err(PhysioError::invalid_parameter(
            "bandpass requires a [low, high] cutoff pair",
        )),
        (method, Cutoffs::Band(_)) => Err(PhysioError::invalid_parameter(format!(
            "{method} requires a single cutoff frequency"
        ))),
    }
}

fn sosfilt(sections: &[Biquad], data: &mut [f64]) {
    let Some(&x0) = data.first() else {
        return;
    };
    let mut level = x0;
    for section in sections {
        let state = section.steady_state(level);
        level *= section.dc_gain();
        section.run(data, state);
    }
}

/// Forward-backward filtering over an odd-reflection padded copy of `data`.
pub fn filtfilt(sections: &[Biquad], data: &[f64]) -> Vec<f64> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }
    let pad = (3 * (2 * sections.len() + 1)).min(n - 1);
    let first = data[0];
    let last = data[n - 1];
    let mut ext = Vec::with_capacity(n + 2 * pad);
    ext.extend((1..=pad).rev().map(|i| 2.0 * first - data[i]));
    ext.extend_from_slice(data);
    ext.extend((1..=pad).map(|i| 2.0 * last - data[n - 1 - i]));

    sosfilt(sections, &mut ext);
    ext.reverse();
    sosfilt(sections, &mut ext);
    ext.reverse();

    ext[pad..pad + n].to_vec()
}

/// Zero-phase filter a record; the input is left untouched.
pub fn filter_physio(
    record: &PhysioRecord,
    cutoffs: Cutoffs,
    method: FilterMethod,
    order: usize,
) -> PhysioResult<PhysioRecord> {
    let sections = design(cutoffs, method, order, record.fs())?;
    let filtered = filtfilt(&sections, record.samples());
    log::debug!(
        "applied {method} filter at {cutoffs} (order {order}) to {} samples",
        filtered.len()
    );
    Ok(record.derive(
        filtered,
        ProcessingStep::Filter {
            cutoffs,
            method,
            order,
        },
    ))
}
