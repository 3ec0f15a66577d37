//! Attack/release envelope, scheduled as linear ramps on a host gain param.

use crate::host::{AudioHost, ParamRef};

/// Ramp from the current level to `target` over `attack` seconds.
/// Earlier automation is cancelled so a retrigger never stacks ramps.
pub fn trigger<H: AudioHost>(host: &mut H, amp: ParamRef, target: f64, attack: f64) {
    let now = host.current_time();
    let current = host.param_value(amp);
    host.cancel_scheduled(amp, now);
    if attack > 0.0 {
        host.set_value_at(amp, current, now);
        host.ramp_linear(amp, target, now + attack);
    } else {
        host.set_value_at(amp, target, now);
    }
}

/// Ramp from the current level down to `floor`. Returns the audio-clock
/// time at which the ramp ends.
pub fn release<H: AudioHost>(host: &mut H, amp: ParamRef, release: f64, floor: f64) -> f64 {
    let now = host.current_time();
    let current = host.param_value(amp);
    host.cancel_scheduled(amp, now);
    host.set_value_at(amp, current, now);
    host.ramp_linear(amp, floor.min(current), now + release);
    now + release
}

/// Cut to zero immediately.
pub fn silence<H: AudioHost>(host: &mut H, amp: ParamRef) {
    let now = host.current_time();
    host.cancel_scheduled(amp, now);
    host.set_value_at(amp, 0.0, now);
}
