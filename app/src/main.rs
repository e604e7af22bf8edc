#![no_main]
#![no_std]

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use cortex_m;
use cortex_m_rt::{entry, exception};
use embassy_time::Instant;
use log::{info, warn};
use panic_halt as _;

use stm32f0xx_hal as hal;

use touch_dispatch::calibrate::BaselineAccumulator;
use touch_dispatch::{
    ButtonState, ChannelConfig, DispatchConfig, FilteredReadings, TouchButtons, TriggerMode,
};

use crate::filter::IirFilter;
use crate::hal::pac;
use crate::hal::pac::interrupt;
use crate::hal::prelude::*;
use crate::hal::rcc::Rcc;
use crate::hal::tsc::Tsc;

mod filter;
mod serial;

#[derive(Clone, Copy, Debug)]
struct TscSample {
    group: u8,
    sample: u8,
    channel: u8,
}

struct TscWrapper {
    tsc: Tsc,
    max_count: u16,
}

impl TscWrapper {
    pub fn new(tsc: pac::TSC, rcc: &mut Rcc) -> Self {
        let config = hal::tsc::Config {
            clock_prescale: None,
            max_count: Some(hal::tsc::MaxCount::U8191),
            charge_transfer_high: None,
            charge_transfer_low: None,
        };
        Self {
            tsc: Tsc::tsc(tsc, rcc, Some(config)),
            max_count: 8191,
        }
    }

    /// Acquire one count per sample. A touched pad adds capacitance, so its
    /// count drops. Groups that hit max count read as `max_count + 1`.
    pub fn sample<const N: usize>(&mut self, samples: &[TscSample; N]) -> [u16; N] {
        // The HAL doesn't expose the group registers, so steal our own.
        let regs = unsafe { pac::Peripherals::steal().TSC };

        let mut iogcsr: u32 = 0;
        let mut ioscr: u32 = 0;
        let mut ioccr: u32 = 0;

        for s in samples {
            iogcsr |= 1 << (s.group - 1);
            ioscr |= 1 << ((s.group - 1) * 4 + s.sample - 1);
            ioccr |= 1 << ((s.group - 1) * 4 + s.channel - 1);
        }

        regs.iogcsr.write(|w| unsafe { w.bits(iogcsr) });
        regs.ioscr.write(|w| unsafe { w.bits(ioscr) });
        regs.ioccr.write(|w| unsafe { w.bits(ioccr) });

        self.tsc.acquire().ok();

        let group_status = regs.iogcsr.read().bits() >> 16;

        let mut result = [self.max_count + 1; N];
        for (i, s) in samples.iter().enumerate() {
            if group_status & (1 << (s.group - 1)) != 0 {
                result[i] = self.tsc.read_unchecked(s.group);
            }
        }
        result
    }
}

/// Pads sharing a group can't be acquired together, so they are split in two passes
static SAMPLE_GROUP1: [TscSample; 4] = [
    TscSample { group: 1, sample: 2, channel: 1 },
    TscSample { group: 2, sample: 3, channel: 1 },
    TscSample { group: 3, sample: 4, channel: 2 },
    TscSample { group: 6, sample: 2, channel: 1 },
];

static SAMPLE_GROUP2: [TscSample; 3] = [
    TscSample { group: 6, sample: 2, channel: 3 },
    TscSample { group: 2, sample: 3, channel: 2 },
    TscSample { group: 3, sample: 4, channel: 3 },
];

const PAD_COUNT: usize = 7;
const PAD_DOWN: usize = 0;
const PAD_STOP: usize = 3;
const PAD_UP: usize = 4;

/// Touch threshold in percent of the idle count
const THRESHOLD_PERCENT: u8 = 90;
/// Filter snapshots averaged into the calibration baseline
const CALIBRATION_SAMPLES: u16 = 16;
/// Filter periods to wait after power up before calibrating
const SETTLE_PERIODS: u32 = 20;
const DIAGNOSTICS_PERIOD_MS: u32 = 5000;
const FILTER_SHIFT: u8 = 2;

static DISPATCH_CONFIG: DispatchConfig = DispatchConfig::default();

static READINGS: FilteredReadings<PAD_COUNT> = FilteredReadings::new();
static TIME: AtomicU32 = AtomicU32::new(0);

static LEVEL: AtomicU8 = AtomicU8::new(0);
static RECALIBRATE: AtomicBool = AtomicBool::new(false);

fn step_up() {
    let level = LEVEL.load(Ordering::Relaxed);
    LEVEL.store(level.saturating_add(1), Ordering::Relaxed);
    info!("level up: {}", level.saturating_add(1));
}

fn step_down() {
    let level = LEVEL.load(Ordering::Relaxed);
    LEVEL.store(level.saturating_sub(1), Ordering::Relaxed);
    info!("level down: {}", level.saturating_sub(1));
}

fn stop() {
    LEVEL.store(0, Ordering::Relaxed);
    info!("stop");
}

fn request_recalibration() {
    RECALIBRATE.store(true, Ordering::Relaxed);
}

fn now() -> Instant {
    Instant::from_millis(TIME.load(Ordering::Relaxed) as u64)
}

fn sample_pads(touch: &mut TscWrapper) -> [u16; PAD_COUNT] {
    let read1 = touch.sample(&SAMPLE_GROUP1);
    cortex_m::asm::delay(1000);
    let read2 = touch.sample(&SAMPLE_GROUP2);

    let mut raw = [0u16; PAD_COUNT];
    raw[..4].copy_from_slice(&read1);
    raw[4..].copy_from_slice(&read2);
    raw
}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();
    let cp = cortex_m::Peripherals::take().unwrap();

    let mut flash = dp.FLASH;
    let mut rcc = dp.RCC.configure().sysclk(48.mhz()).freeze(&mut flash);
    let gpioa = dp.GPIOA.split(&mut rcc);
    let gpiob = dp.GPIOB.split(&mut rcc);

    // A library requiring a critical section to set a gpio AF register is bad and I just won't.
    let fake_cs = unsafe { cortex_m::interrupt::CriticalSection::new() };

    // Touch pads
    let _pad0 = gpioa.pa0.into_alternate_af3(&fake_cs);
    let _pad1 = gpioa.pa4.into_alternate_af3(&fake_cs);
    let _pad2 = gpiob.pb0.into_alternate_af3(&fake_cs);
    let _pad3 = gpiob.pb11.into_alternate_af3(&fake_cs);
    let _pad4 = gpiob.pb13.into_alternate_af3(&fake_cs);
    let _pad5 = gpioa.pa5.into_alternate_af3(&fake_cs);
    let _pad6 = gpiob.pb1.into_alternate_af3(&fake_cs);
    // Sampling capacitors
    let _g1_cap = gpioa.pa1.into_alternate_af3(&fake_cs);
    let _g2_cap = gpioa.pa6.into_alternate_af3(&fake_cs);
    let _g3_cap = gpiob.pb2.into_alternate_af3(&fake_cs);
    let _g6_cap = gpiob.pb12.into_alternate_af3(&fake_cs);

    let tx_pin = gpiob.pb6.into_alternate_af0(&fake_cs);
    let rx_pin = gpiob.pb7.into_alternate_af0(&fake_cs);
    let uart = hal::serial::Serial::usart1(dp.USART1, (tx_pin, rx_pin), 115200.bps(), &mut rcc);
    serial::uart1::init(uart, 4);

    let mut touch = TscWrapper::new(dp.TSC, &mut rcc);

    let mut syst = hal::timers::Timer::syst(cp.SYST, 1000.hz(), &mut rcc);
    syst.listen(&hal::timers::Event::TimeOut);

    let mut buttons: TouchButtons<'static, fn(), PAD_COUNT> =
        match TouchButtons::new(&READINGS, Some(DISPATCH_CONFIG)) {
            Ok(buttons) => buttons,
            Err(e) => {
                warn!("touch setup failed: {}", e);
                loop {
                    cortex_m::asm::wfi();
                }
            }
        };

    let pads: [(usize, ChannelConfig, fn()); 5] = [
        (PAD_UP, ChannelConfig::new(THRESHOLD_PERCENT), step_up),
        (PAD_DOWN, ChannelConfig::new(THRESHOLD_PERCENT), step_down),
        (
            PAD_STOP,
            ChannelConfig::new(THRESHOLD_PERCENT).trigger(TriggerMode::Fall),
            stop,
        ),
        (
            PAD_STOP,
            ChannelConfig::new(THRESHOLD_PERCENT)
                .trigger(TriggerMode::Fall)
                .on(ButtonState::LongPressed),
            request_recalibration,
        ),
        // Holding "up" into the medium bucket steps once more. Release waiting is
        // per pad, so this also turns it off for the short press registered above.
        (
            PAD_UP,
            ChannelConfig::new(THRESHOLD_PERCENT)
                .on(ButtonState::MediumPressed)
                .wait_for_release(false),
            step_up,
        ),
    ];
    for (pad, config, callback) in pads {
        if let Err(e) = buttons.configure(pad, config, Some(callback)) {
            warn!("touch: pad {} not configured: {}", pad, e);
        }
    }

    let filter_period_ms = DISPATCH_CONFIG.filter_period.as_millis() as u32;
    let dispatch_period_ms = DISPATCH_CONFIG.dispatch_period.as_millis() as u32;

    let mut filter = IirFilter::<PAD_COUNT>::new(FILTER_SHIFT);
    let mut baseline = BaselineAccumulator::<PAD_COUNT>::new(CALIBRATION_SAMPLES);
    let mut settle = SETTLE_PERIODS;

    let mut next_filter = 0;
    let mut next_dispatch = 0;
    let mut next_diagnostics = DIAGNOSTICS_PERIOD_MS;

    info!("touch: waiting for pads to settle");

    loop {
        let time = TIME.load(Ordering::Relaxed);

        if time >= next_filter {
            next_filter += filter_period_ms;
            let filtered = filter.update(&sample_pads(&mut touch));
            READINGS.store_all(&filtered);

            if !buttons.is_dispatch_enabled() {
                if settle > 0 {
                    settle -= 1;
                } else if baseline.push(&filtered) {
                    if let Some(mean) = baseline.baseline() {
                        buttons.calibrate_from_baseline(&mean);
                        buttons.enable_dispatch();
                        info!("touch: calibrated, dispatch armed");
                    }
                }
            }
        }

        if time >= next_dispatch {
            next_dispatch += dispatch_period_ms;
            buttons.tick(now());

            // No compare-and-swap on this core; only the main loop clears the flag
            if RECALIBRATE.load(Ordering::Relaxed) {
                RECALIBRATE.store(false, Ordering::Relaxed);
                // Fired on release of the stop pad, so every pad is at rest again
                buttons.disable_dispatch();
                baseline.restart();
                settle = SETTLE_PERIODS;
                info!("touch: recalibrating");
            }
        }

        if time >= next_diagnostics {
            next_diagnostics += DIAGNOSTICS_PERIOD_MS;
            buttons.log_diagnostics();
            if let Some(idle) = buttons.time_since_last_callback(now()) {
                info!("touch: idle for {} ms", idle.as_millis());
            }
        }

        cortex_m::asm::wfi();
    }
}

#[exception]
fn SysTick() {
    let time = TIME.load(Ordering::Relaxed);
    TIME.store(time + 1, Ordering::Relaxed);
}
