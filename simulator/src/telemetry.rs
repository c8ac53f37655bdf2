use monitor::model::SensorReading;
use rand::Rng;

/// Random living-room reading. Roughly one in twenty looks like a fire starting.
pub fn generate_reading(rng: &mut impl Rng) -> SensorReading {
    if rng.gen_bool(0.05) {
        return fire_reading(rng);
    }

    let temperature = if rng.gen_bool(0.05) {
        rng.gen_range(-10.0..50.0) // 5% outliers
    } else {
        rng.gen_range(18.0..28.0)
    };

    let humidity = if rng.gen_bool(0.05) {
        rng.gen_range(0.0..100.0) // 5% outliers
    } else {
        rng.gen_range(30.0..60.0)
    };

    let smoke_level: f64 = if rng.gen_bool(0.03) {
        rng.gen_range(300.0..1000.0) // burnt toast
    } else {
        rng.gen_range(0.0..80.0)
    };

    SensorReading {
        temperature: round1(temperature),
        humidity: round1(humidity),
        smoke_level: smoke_level.round(),
        flame_detected: false,
    }
}

fn fire_reading(rng: &mut impl Rng) -> SensorReading {
    SensorReading {
        temperature: round1(rng.gen_range(45.0..90.0)),
        humidity: round1(rng.gen_range(5.0..25.0)),
        smoke_level: rng.gen_range(500.0..1500.0f64).round(),
        flame_detected: rng.gen_bool(0.8),
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
