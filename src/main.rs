//! # TaktOS Demo Firmware
//!
//! The canonical takt-time application: a primary task whose body runs once
//! per 10 ms timer period, and a background task that soaks up the spare
//! cycles polling a button.
//!
//! | Task         | Priority | Created   | Behavior                          |
//! |--------------|----------|-----------|-----------------------------------|
//! | `primary`    | 1        | auto      | LED cadence, drains the press log |
//! | `background` | 31       | suspended | button edge → red LED + press log |
//!
//! The primary task performs the one-time initialization (LEDs on) and only
//! then resumes the background task, guaranteeing init-before-background
//! ordering without any extra barrier. Button press timestamps cross from
//! the background task to the primary task through an SPSC ring — bounded,
//! reject-when-full — never through a bare shared counter.
//!
//! Builds for `thumbv7em-none-eabi`; on any other target `main` is a stub
//! so the host test suite builds the workspace cleanly.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use cortex_m_rt::entry;
    use panic_halt as _;

    use taktos::config::NO_TIME_SLICE;
    use taktos::flags::MatchMode;
    use taktos::kernel;
    use taktos::line::DigitalLine;
    use taktos::spsc::SpscRing;
    use taktos::task::{TaskConfig, TaskId};
    use taktos::time::{millis_to_ticks, Timeout};
    use taktos::timer::{TimerId, TimerMode};

    // -----------------------------------------------------------------------
    // Board: STM32F4 GPIO lines
    // -----------------------------------------------------------------------

    const RCC_AHB1ENR: *mut u32 = 0x4002_3830 as *mut u32;
    const GPIOA_MODER: *mut u32 = 0x4002_0000 as *mut u32;
    const GPIOA_ODR: *mut u32 = 0x4002_0014 as *mut u32;
    const GPIOC_IDR: *const u32 = 0x4002_0810 as *const u32;

    const GREEN_LED_PIN: u8 = 5; // PA5
    const ORANGE_LED_PIN: u8 = 6; // PA6
    const RED_LED_PIN: u8 = 7; // PA7
    const BUTTON_PIN: u8 = 13; // PC13, active low

    /// Output line over a GPIO output data register.
    struct OutputLine {
        odr: *mut u32,
        pin: u8,
    }

    impl OutputLine {
        const fn new(odr: *mut u32, pin: u8) -> Self {
            OutputLine { odr, pin }
        }
    }

    impl DigitalLine for OutputLine {
        fn read(&self) -> bool {
            unsafe { core::ptr::read_volatile(self.odr) & (1 << self.pin) != 0 }
        }

        fn write(&mut self, high: bool) {
            unsafe {
                let value = core::ptr::read_volatile(self.odr);
                let value = if high {
                    value | (1 << self.pin)
                } else {
                    value & !(1 << self.pin)
                };
                core::ptr::write_volatile(self.odr, value);
            }
        }
    }

    /// Input-only line over a GPIO input data register; writes are ignored.
    struct InputLine {
        idr: *const u32,
        pin: u8,
    }

    impl DigitalLine for InputLine {
        fn read(&self) -> bool {
            unsafe { core::ptr::read_volatile(self.idr) & (1 << self.pin) != 0 }
        }

        fn write(&mut self, _high: bool) {}
    }

    /// Enable GPIOA/GPIOC clocks and make the LED pins outputs.
    fn init_gpio() {
        unsafe {
            let enr = core::ptr::read_volatile(RCC_AHB1ENR);
            core::ptr::write_volatile(RCC_AHB1ENR, enr | (1 << 0) | (1 << 2));

            let mut moder = core::ptr::read_volatile(GPIOA_MODER);
            for pin in [GREEN_LED_PIN, ORANGE_LED_PIN, RED_LED_PIN] {
                moder = (moder & !(0b11 << (pin * 2))) | (0b01 << (pin * 2));
            }
            core::ptr::write_volatile(GPIOA_MODER, moder);
        }
    }

    // -----------------------------------------------------------------------
    // Application configuration
    // -----------------------------------------------------------------------

    /// Timer period driving the primary task's cadence.
    const WAKE_PERIOD_MS: u64 = 10;

    /// Event flag the timer callback sets each period.
    const EVT_WAKE: u32 = 0x0000_0001;

    /// Primary-task wake counts between LED toggles.
    const GREEN_TOGGLE_PERIODS: u32 = 10; // 100 ms
    const ORANGE_TOGGLE_PERIODS: u32 = 100; // 1 s

    /// Handles created in `main` and needed by tasks / the timer callback.
    /// Atomics, not bare statics: these words cross execution contexts.
    static WAKE_GROUP: AtomicUsize = AtomicUsize::new(usize::MAX);
    static BACKGROUND_TASK: AtomicUsize = AtomicUsize::new(usize::MAX);

    /// Button press timestamps (tick counts, truncated to u32), produced by
    /// the background task and drained by the primary task.
    static PRESS_LOG: SpscRing<16> = SpscRing::new();

    // -----------------------------------------------------------------------
    // Timer callback (interrupt context)
    // -----------------------------------------------------------------------

    /// Runs in interrupt context on each period: signal the primary task
    /// and nothing else.
    fn period_elapsed(_timer: TimerId) {
        let group = WAKE_GROUP.load(Ordering::Relaxed);
        let _ = kernel::event_flags_set(group, EVT_WAKE);
    }

    // -----------------------------------------------------------------------
    // Task bodies
    // -----------------------------------------------------------------------

    /// Primary task: one-time init, then one application pass per timer
    /// period, synchronized through the wake flag.
    extern "C" fn primary_task() -> ! {
        let mut green = OutputLine::new(GPIOA_ODR, GREEN_LED_PIN);
        let mut orange = OutputLine::new(GPIOA_ODR, ORANGE_LED_PIN);

        // One-time initialization before background work may run.
        green.write(true);
        orange.write(true);
        let background = BACKGROUND_TASK.load(Ordering::Relaxed);
        let _ = kernel::resume(background);

        let group = WAKE_GROUP.load(Ordering::Relaxed);
        let mut green_countdown = GREEN_TOGGLE_PERIODS;
        let mut orange_countdown = ORANGE_TOGGLE_PERIODS;
        let mut presses_seen: u32 = 0;

        loop {
            // --- application pass, once per period ---
            green_countdown -= 1;
            if green_countdown == 0 {
                green_countdown = GREEN_TOGGLE_PERIODS;
                green.toggle();
            }

            orange_countdown -= 1;
            if orange_countdown == 0 {
                orange_countdown = ORANGE_TOGGLE_PERIODS;
                orange.toggle();
            }

            while let Some(_timestamp) = PRESS_LOG.pop() {
                presses_seen = presses_seen.wrapping_add(1);
            }

            // --- wait for the next period ---
            let _ = kernel::event_flags_get(
                group,
                EVT_WAKE,
                MatchMode::AnyBit,
                true,
                Timeout::Forever,
            );
        }
    }

    /// Background task: lowest priority, runs whenever nothing more urgent
    /// is ready. Mirrors the button onto the red LED and logs press edges.
    extern "C" fn background_task() -> ! {
        let button = InputLine {
            idr: GPIOC_IDR,
            pin: BUTTON_PIN,
        };
        let mut red = OutputLine::new(GPIOA_ODR, RED_LED_PIN);
        let mut was_pressed = false;

        loop {
            // Active-low button.
            // TODO: debounce — a bounce spanning two polls records twice.
            let pressed = !button.read();
            if pressed && !was_pressed {
                red.write(true);
                let _ = PRESS_LOG.push(kernel::ticks() as u32);
            } else if !pressed && was_pressed {
                red.write(false);
            }
            was_pressed = pressed;
        }
    }

    // -----------------------------------------------------------------------
    // Entry point
    // -----------------------------------------------------------------------

    /// Firmware entry. Creation order is fixed: background task (suspended)
    /// → primary task (auto-start) → event flag group → periodic timer →
    /// fault hook → start. Initialization failures halt via panic-halt.
    #[entry]
    fn main() -> ! {
        let peripherals = cortex_m::Peripherals::take().unwrap();
        init_gpio();

        kernel::init().expect("kernel init failed");

        let background = kernel::create_task(
            background_task,
            TaskConfig {
                priority: 31,
                preemption_threshold: 31,
                stack_size: 2 * 1024,
                time_slice: NO_TIME_SLICE,
                auto_start: false,
            },
        )
        .expect("background task");
        BACKGROUND_TASK.store(background, Ordering::Relaxed);

        kernel::create_task(
            primary_task,
            TaskConfig {
                priority: 1,
                preemption_threshold: 1,
                stack_size: 2 * 1024,
                time_slice: NO_TIME_SLICE,
                auto_start: true,
            },
        )
        .expect("primary task");

        let wake_group = kernel::event_flags_create().expect("wake flag group");
        WAKE_GROUP.store(wake_group, Ordering::Relaxed);

        // Narrowing to the timer's tick width is the caller's concern.
        let period = millis_to_ticks(WAKE_PERIOD_MS) as u32;
        kernel::timer_create(period, TimerMode::Periodic, period_elapsed)
            .expect("wake timer");

        kernel::stack_fault_notify(stack_fault);

        kernel::start(peripherals)
    }

    /// Fault sink: latch the red LED before the kernel parks the core.
    fn stack_fault(_task: TaskId) {
        OutputLine::new(GPIOA_ODR, RED_LED_PIN).write(true);
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    println!("taktos demo firmware — build for a thumbv7em-none-eabi target");
}
