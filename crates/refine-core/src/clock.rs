//! Reloj inyectable y cálculo de horas hábiles.
//!
//! `business_hours` avanza desde `start` en pasos de una hora mientras el
//! cursor sea anterior a `end`; cada paso que cae de lunes a viernes (UTC)
//! suma 1. Granularidad horaria: un intervalo de 2h30m cuenta 3 pasos.
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};

/// Fuente de "ahora" para el motor.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Reloj fijo y ajustable, pensado para tests y para replay.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn is_weekday(t: DateTime<Utc>) -> bool {
    !matches!(t.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Horas hábiles entre `start` y `end`. 0 si `end <= start`.
///
/// Total: el recorrido se corta si el cursor sale del rango representable.
pub fn business_hours(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    if end <= start {
        return 0;
    }
    let step = Duration::hours(1);
    let mut hours = 0u32;
    let mut cursor = Some(start);
    while let Some(at) = cursor.filter(|at| *at < end) {
        if is_weekday(at) {
            hours = hours.saturating_add(1);
        }
        cursor = at.checked_add_signed(step);
    }
    hours
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn same_instant_is_zero() {
        let t = at(2024, 5, 8, 10, 0);
        assert_eq!(business_hours(t, t), 0);
    }

    #[test]
    fn reversed_interval_is_zero() {
        assert_eq!(business_hours(at(2024, 5, 8, 10, 0), at(2024, 5, 8, 9, 0)), 0);
    }

    #[test]
    fn weekday_span_counts_every_hour() {
        // lunes 08:00 -> martes 14:00 = 30 h hábiles
        assert_eq!(business_hours(at(2024, 5, 6, 8, 0), at(2024, 5, 7, 14, 0)), 30);
    }

    #[test]
    fn weekend_hours_do_not_count() {
        // viernes 17:00 -> lunes 09:00: 7 h del viernes + 9 h del lunes
        let fri = at(2024, 5, 10, 17, 0);
        let mon = at(2024, 5, 13, 9, 0);
        let first = business_hours(fri, mon);
        assert_eq!(first, 16);
        for _ in 0..3 {
            assert_eq!(business_hours(fri, mon), first);
        }
    }

    #[test]
    fn pure_weekend_is_zero() {
        assert_eq!(business_hours(at(2024, 5, 11, 0, 0), at(2024, 5, 13, 0, 0)), 0);
    }

    #[test]
    fn fractional_hours_count_whole_steps() {
        // 2h30m -> pasos en 10:00, 11:00, 12:00
        assert_eq!(business_hours(at(2024, 5, 8, 10, 0), at(2024, 5, 8, 12, 30)), 3);
        // 20 minutos -> un paso
        assert_eq!(business_hours(at(2024, 5, 8, 10, 0), at(2024, 5, 8, 10, 20)), 1);
    }

    #[test]
    fn span_ending_at_max_datetime_does_not_overflow() {
        let end = DateTime::<Utc>::MAX_UTC;
        let hours = business_hours(end - Duration::minutes(90), end);
        assert!(hours <= 2);
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(at(2024, 1, 1, 0, 0));
        clock.advance(Duration::hours(5));
        assert_eq!(clock.now(), at(2024, 1, 1, 5, 0));
        clock.set(at(2025, 1, 1, 0, 0));
        assert_eq!(clock.now(), at(2025, 1, 1, 0, 0));
    }
}
