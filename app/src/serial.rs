/// An IRQ driven serial port, also used as the `log` sink
///
pub mod uart1 {
    use crate::interrupt;
    use crate::hal::{
        pac,
        prelude::*,
        serial::{
            Event,
            Serial,
        }
    };
    use heapless::spsc::{Consumer, Producer, Queue};
    use stm32f0xx_hal::gpio::{
        gpiob,
        Alternate,
        AF0,
    };

    const TX_Q_SIZE: usize = 256;
    const RX_Q_SIZE: usize = 8;

    static mut TX_Q_CONSUMER: Option<Consumer<u8, TX_Q_SIZE>> = None;
    static mut TX_Q_PRODUCER: Option<Producer<u8, TX_Q_SIZE>> = None;
    static mut RX_Q_PRODUCER: Option<Producer<u8, RX_Q_SIZE>> = None;

    type TxPinType = gpiob::PB6<Alternate<AF0>>;
    type RxPinType = gpiob::PB7<Alternate<AF0>>;
    static mut SERIAL: Option<Serial<pac::USART1, TxPinType, RxPinType>> = None;

    pub struct Uart1Tx {}

    impl core::fmt::Write for Uart1Tx {
        fn write_str(&mut self, s: &str) -> Result<(), core::fmt::Error> {
            for b in s.bytes() {
                write_byte(b);
            }
            Ok(())
        }
    }

    /// Forwards `log` records to the TX queue. Records that don't fit are truncated.
    pub struct SerialLogger {
        level: log::LevelFilter,
    }

    impl log::Log for SerialLogger {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                let mut writer = writer();
                core::fmt::write(&mut writer, format_args!("{} {}\r\n", record.level(), record.args())).ok();
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: SerialLogger = SerialLogger { level: log::LevelFilter::Debug };

    /// Must be called once during application initialization, before interrupts that log are enabled
    pub fn init(mut serial: Serial<pac::USART1, TxPinType, RxPinType>, irq_prio: u8) {
        let core = unsafe { pac::CorePeripherals::steal() };
        let mut nvic = core.NVIC;

        serial.listen(Event::Rxne);

        static mut RX_Q: Queue<u8, RX_Q_SIZE> = Queue::new();
        static mut TX_Q: Queue<u8, TX_Q_SIZE> = Queue::new();

        let (rx_q_producer, _rx_q_consumer) = unsafe { RX_Q.split() };
        let (tx_q_producer, tx_q_consumer) = unsafe { TX_Q.split() };

        unsafe {
            RX_Q_PRODUCER = Some(rx_q_producer);
            TX_Q_PRODUCER = Some(tx_q_producer);
            TX_Q_CONSUMER = Some(tx_q_consumer);
            SERIAL = Some(serial);

            nvic.set_priority(pac::Interrupt::USART1, irq_prio);
            pac::NVIC::unmask(pac::Interrupt::USART1);

            // thumbv6m has no compare-and-swap, so the racy setters are the only option.
            // Nothing logs before this point.
            log::set_logger_racy(&LOGGER).ok();
            log::set_max_level_racy(LOGGER.level);
        }
    }

    pub fn write_byte(b: u8) {
        cortex_m::interrupt::free(|_| {
            let tx_q_producer = unsafe { TX_Q_PRODUCER.as_mut().unwrap_unchecked() };
            // Drop the byte if the queue is full
            let _ = tx_q_producer.enqueue(b);
            let serial = unsafe { SERIAL.as_mut().unwrap_unchecked() };
            serial.listen(Event::Txe);
        });
    }

    pub fn writer() -> Uart1Tx {
        Uart1Tx {}
    }

    #[interrupt]
    fn USART1() {
        let serial = unsafe { SERIAL.as_mut().unwrap_unchecked() };
        let rx_q_producer = unsafe { RX_Q_PRODUCER.as_mut().unwrap_unchecked() };
        let tx_q_consumer = unsafe { TX_Q_CONSUMER.as_mut().unwrap_unchecked() };
        let usart1 = unsafe { crate::hal::pac::Peripherals::steal().USART1 };

        // Received bytes are only drained to keep the peripheral from overrunning
        if let Ok(rxbyte) = serial.read() {
            rx_q_producer.enqueue(rxbyte).ok();
        }

        let isr = (*usart1).isr.read();
        if isr.txe().bit_is_set() {
            match tx_q_consumer.dequeue() {
                Some(b) => {
                    serial.write(b).ok();
                },
                None => {
                    // Queue empty: mask TXE until the next write re-enables it
                    serial.unlisten(Event::Txe);
                }
            }
        }
    }
}
