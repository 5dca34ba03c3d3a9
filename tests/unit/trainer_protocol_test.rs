//! Unit tests for trainer command encoding per machine class.

use proptest::prelude::*;
use ridekeeper::trainer::{ControlCommand, MachineClass, TrainerError};

#[test]
fn test_power_target_per_class() {
    let command = ControlCommand::SetPowerTarget { watts: 250.0 };

    // FTMS: opcode 0x05, sint16 watts
    assert_eq!(MachineClass::Ftms.encode(&command).unwrap(), vec![0x05, 0xFA, 0x00]);

    // FE-C page 49: quarter watts, 1000 = 0x03E8
    assert_eq!(
        MachineClass::FeC.encode(&command).unwrap(),
        vec![0x31, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xE8, 0x03]
    );

    assert!(matches!(
        MachineClass::ResistanceOnly.encode(&command),
        Err(TrainerError::Unsupported {
            class: MachineClass::ResistanceOnly,
            ..
        })
    ));
}

#[test]
fn test_grade_simulation_per_class() {
    let command = ControlCommand::SetSimulationParameters {
        grade: 5.0,
        wind_speed: 0.0,
        rolling_resistance: 0.004,
    };

    // FE-C page 51: grade offset by 200 % in 0.01 % steps, crr in 5e-5 steps
    assert_eq!(
        MachineClass::FeC.encode(&command).unwrap(),
        vec![0x33, 0xFF, 0xFF, 0xFF, 0xFF, 0x14, 0x50, 80]
    );
    assert_eq!(MachineClass::Ftms.encode(&command).unwrap()[0], 0x11);
}

#[test]
fn test_resistance_understood_by_every_class() {
    let command = ControlCommand::SetResistanceLevel { level: 40.0 };
    for class in [MachineClass::Ftms, MachineClass::FeC, MachineClass::ResistanceOnly] {
        assert!(class.encode(&command).is_ok(), "{} refused resistance", class);
        assert!(class.capabilities().resistance);
    }
    // FE-C page 48 in 0.5 % steps
    assert_eq!(
        MachineClass::ResistanceOnly.encode(&command).unwrap(),
        vec![0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 80]
    );
}

#[test]
fn test_start_stop_only_on_ftms() {
    for command in [ControlCommand::StartSession, ControlCommand::StopSession] {
        assert!(MachineClass::Ftms.encode(&command).is_ok());
        assert!(MachineClass::FeC.encode(&command).is_err());
        assert!(MachineClass::ResistanceOnly.encode(&command).is_err());
    }
}

proptest! {
    #[test]
    fn prop_ftms_power_is_rounded_and_clamped(watts in -500.0f64..40_000.0) {
        let bytes = MachineClass::Ftms
            .encode(&ControlCommand::SetPowerTarget { watts })
            .unwrap();
        prop_assert_eq!(bytes.len(), 3);
        let sent = i16::from_le_bytes([bytes[1], bytes[2]]);
        let expected = watts.round().clamp(0.0, f64::from(i16::MAX)) as i16;
        prop_assert_eq!(sent, expected);
    }

    #[test]
    fn prop_fec_pages_are_eight_bytes(watts in 0.0f64..3000.0, grade in -40.0f64..40.0) {
        let power = MachineClass::FeC
            .encode(&ControlCommand::SetPowerTarget { watts })
            .unwrap();
        let sim = MachineClass::FeC
            .encode(&ControlCommand::SetSimulationParameters {
                grade,
                wind_speed: 0.0,
                rolling_resistance: 0.004,
            })
            .unwrap();
        prop_assert_eq!(power.len(), 8);
        prop_assert_eq!(sim.len(), 8);
        let quarter_watts = u16::from_le_bytes([power[6], power[7]]);
        prop_assert!((f64::from(quarter_watts) / 4.0 - watts).abs() <= 0.125);
    }
}
