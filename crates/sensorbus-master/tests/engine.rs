//! Bus master operations against simulated boards.

mod common;

use common::{master, record, SimBoard, SimBus, SimSensor, INA219};
use sensorbus_master::MasterError;
use sensorbus_protocol::{
    CommandFrame, ProtocolConfig, ProtocolError, ResponseFrame, StatusCode, STATUS_ERROR,
    STATUS_NOT_FOUND, STATUS_OK,
};
use sensorbus_registry::{FieldValue, RegistryError};

#[test]
fn test_scan_reports_ok_and_not_found_boards() {
    let bus = SimBus::new()
        .with_board(2, SimBoard::new())
        .with_board(3, SimBoard::new().with_ping_status(STATUS_NOT_FOUND))
        .with_board(4, SimBoard::new());
    let (master, transport) = master(&bus);

    assert_eq!(master.scan(1..=5), vec![2, 3, 4]);

    let pinged: Vec<u8> = transport.frames().iter().map(|f| f.board_id).collect();
    assert_eq!(pinged, vec![1, 2, 3, 4, 5]);

    let answered: Vec<(u8, StatusCode)> = transport
        .responses()
        .iter()
        .map(|r| (r.header.board_id, r.header.status))
        .collect();
    assert_eq!(
        answered,
        vec![
            (2, StatusCode(STATUS_OK)),
            (3, StatusCode(STATUS_NOT_FOUND)),
            (4, StatusCode(STATUS_OK)),
        ]
    );
}

#[test]
fn test_scan_skips_boards_with_other_status() {
    let bus = SimBus::new()
        .with_board(1, SimBoard::new().with_ping_status(STATUS_ERROR))
        .with_board(2, SimBoard::new());
    let (master, _) = master(&bus);

    assert_eq!(master.scan(1..=2), vec![2]);
}

#[test]
fn test_scan_treats_corrupt_answer_as_absent() {
    let mut board = SimBoard::new();
    board.corrupt_checksum = true;
    let bus = SimBus::new().with_board(1, board).with_board(2, SimBoard::new());
    let (master, _) = master(&bus);

    assert_eq!(master.scan(1..=2), vec![2]);
}

#[test]
fn test_corrupt_checksum_is_reported() {
    let mut board = SimBoard::new();
    board.corrupt_checksum = true;
    let bus = SimBus::new().with_board(1, board);
    let (master, transport) = master(&bus);

    let err = master.ping(1).unwrap_err();
    assert!(err.is_checksum());
    assert!(!err.is_timeout());
    assert_eq!(transport.rejected_responses(), 1);
    assert!(transport.responses().is_empty());
}

#[test]
fn test_list_add_remove_sensors() {
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, SimSensor::ina219(5)));
    let (master, _) = master(&bus);

    assert_eq!(master.list_sensors(1).unwrap(), vec![("ina219".to_string(), 0x40)]);

    assert_eq!(master.add_sensor(1, 0x41, "INA219").unwrap(), StatusCode(STATUS_OK));
    assert_eq!(
        master.list_sensors(1).unwrap(),
        vec![("ina219".to_string(), 0x40), ("ina219".to_string(), 0x41)]
    );
    assert_eq!(bus.board(1).unwrap().sensors[&0x41].type_code, INA219);

    assert_eq!(master.remove_sensor(1, 0x40).unwrap(), StatusCode(STATUS_OK));
    assert_eq!(master.remove_sensor(1, 0x40).unwrap(), StatusCode(STATUS_NOT_FOUND));
    assert_eq!(master.list_sensors(1).unwrap(), vec![("ina219".to_string(), 0x41)]);
}

#[test]
fn test_unknown_type_code_is_named() {
    let sensor = SimSensor {
        type_code: 9,
        ..Default::default()
    };
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x10, sensor));
    let (master, _) = master(&bus);

    assert_eq!(master.list_sensors(1).unwrap(), vec![("unknown(9)".to_string(), 0x10)]);
}

#[test]
fn test_list_failure_is_device_status() {
    let mut board = SimBoard::new();
    board.list_fails = true;
    let bus = SimBus::new().with_board(1, board);
    let (master, _) = master(&bus);

    let err = master.list_sensors(1).unwrap_err();
    assert!(matches!(
        err,
        MasterError::DeviceStatus { status: StatusCode(STATUS_ERROR), .. }
    ));
}

#[test]
fn test_add_unknown_sensor_sends_nothing() {
    let bus = SimBus::new().with_board(1, SimBoard::new());
    let (master, transport) = master(&bus);

    let err = master.add_sensor(1, 0x40, "bme280").unwrap_err();
    assert!(matches!(err, MasterError::Registry(RegistryError::UnknownSensor(_))));
    assert_eq!(transport.frame_count(), 0);
}

#[test]
fn test_config_field_is_cached_after_first_read() {
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, SimSensor::ina219(5)));
    let (master, transport) = master(&bus);

    assert_eq!(
        master.get_config_field(1, 0x40, "ina219", "gain").unwrap(),
        FieldValue::Scalar(3)
    );
    assert_eq!(transport.frames(), vec![CommandFrame::new(1, 0x40, 31, 0)]);

    assert_eq!(
        master.get_config_field(1, 0x40, "ina219", "gain").unwrap(),
        FieldValue::Scalar(3)
    );
    assert_eq!(transport.frame_count(), 1);
}

#[test]
fn test_set_config_field_updates_cache_on_ok() {
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, SimSensor::ina219(5)));
    let (master, transport) = master(&bus);

    assert_eq!(
        master.set_config_field(1, 0x40, "ina219", "gain", 7).unwrap(),
        StatusCode(STATUS_OK)
    );
    assert_eq!(transport.frames(), vec![CommandFrame::new(1, 0x40, 21, 7)]);

    assert_eq!(
        master.get_config_field(1, 0x40, "ina219", "gain").unwrap(),
        FieldValue::Scalar(7)
    );
    assert_eq!(transport.frame_count(), 1);
}

#[test]
fn test_set_config_field_failure_leaves_cache_alone() {
    let bus = SimBus::new().with_board(1, SimBoard::new());
    let (master, transport) = master(&bus);

    // No sensor at 0x40: the board answers NOT_FOUND.
    assert_eq!(
        master.set_config_field(1, 0x40, "ina219", "gain", 7).unwrap(),
        StatusCode(STATUS_NOT_FOUND)
    );

    bus.update(1, |board| {
        board.sensors.insert(0x40, SimSensor::ina219(5));
    });
    assert_eq!(
        master.get_config_field(1, 0x40, "ina219", "gain").unwrap(),
        FieldValue::Scalar(3)
    );
    assert_eq!(transport.frame_count(), 2);
}

#[test]
fn test_missing_getter_and_setter() {
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, SimSensor::ina219(5)));
    let (master, transport) = master(&bus);

    let err = master.get_config_field(1, 0x40, "ina219", "shunt").unwrap_err();
    assert!(matches!(err, MasterError::NoGetter { .. }));

    let err = master.get_config_field(1, 0x40, "ina219", "offset").unwrap_err();
    assert!(matches!(err, MasterError::Registry(RegistryError::UnknownField { .. })));

    assert_eq!(transport.frame_count(), 0);
}

#[test]
fn test_get_all_config_fields_skips_write_only() {
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, SimSensor::ina219(5)));
    let (master, _) = master(&bus);

    let fields = master.get_all_config_fields(1, 0x40, "ina219").unwrap();
    assert_eq!(
        fields,
        vec![
            ("period".to_string(), FieldValue::Scalar(5)),
            ("gain".to_string(), FieldValue::Scalar(3)),
            ("range".to_string(), FieldValue::Scalar(1)),
        ]
    );
}

#[test]
fn test_payload_mask_cached() {
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, SimSensor::ina219(5)));
    let (master, transport) = master(&bus);

    assert_eq!(master.get_payload_mask(1, 0x40).unwrap(), 0b011);
    assert_eq!(master.get_payload_mask(1, 0x40).unwrap(), 0b011);
    assert_eq!(transport.frame_count(), 1);

    assert_eq!(master.set_payload_mask(1, 0x40, 0b101).unwrap(), StatusCode(STATUS_OK));
    assert_eq!(master.get_payload_mask(1, 0x40).unwrap(), 0b101);
    assert_eq!(transport.frame_count(), 2);
    assert_eq!(bus.board(1).unwrap().sensors[&0x40].mask, 0b101);
}

#[test]
fn test_read_samples_with_device_mask() {
    let mut samples = record(10, 0x1F40, -100);
    samples.extend(record(11, 0x1F41, 250));
    let sensor = SimSensor::ina219(5).with_samples(samples);
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, sensor));
    let (master, transport) = master(&bus);

    let records = master.read_samples(1, 0x40, "ina219", None).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tick, 10);
    assert_eq!(records[0].get("bus_voltage"), Some(&FieldValue::Scalar(0x1F40)));
    assert_eq!(records[0].get("current"), Some(&FieldValue::Scalar(-100)));
    assert_eq!(records[1].get("current"), Some(&FieldValue::Scalar(250)));
    assert!(records[0].get("power").is_none());

    // Mask fetched first, then samples; the second read reuses the mask.
    master.read_samples(1, 0x40, "ina219", None).unwrap();
    let commands: Vec<u8> = transport.frames().iter().map(|f| f.command).collect();
    assert_eq!(commands, vec![6, 0, 0]);
}

#[test]
fn test_read_samples_with_explicit_mask() {
    let sensor = SimSensor::ina219(5).with_samples(vec![0, 0, 0, 5, 0xAA, 0xBB]);
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, sensor));
    let (master, transport) = master(&bus);

    let records = master.read_samples(1, 0x40, "ina219", Some(0x01)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tick, 5);
    assert_eq!(records[0].fields.len(), 1);
    assert_eq!(records[0].get("bus_voltage"), Some(&FieldValue::Scalar(0xAABB)));
    assert_eq!(transport.frame_count(), 1);

    let json = serde_json::to_value(&records).unwrap();
    assert_eq!(json, serde_json::json!([{ "tick": 5, "bus_voltage": 0xAABB }]));
}

#[test]
fn test_short_sample_payload_yields_no_records() {
    let sensor = SimSensor::ina219(5).with_samples(vec![0, 0, 1]);
    let bus = SimBus::new().with_board(1, SimBoard::new().with_sensor(0x40, sensor));
    let (master, _) = master(&bus);

    assert!(master.read_samples(1, 0x40, "ina219", Some(0x03)).unwrap().is_empty());
}

#[test]
fn test_stale_and_leading_garbage_is_skipped() {
    let bus = SimBus::new().with_board(1, SimBoard::new());
    let (master, transport) = master(&bus);

    // Stale bytes are cleared before the request is written.
    transport.inject_read(&[0xAA, 0x01, 0x02]);
    assert_eq!(master.ping(1).unwrap(), StatusCode(STATUS_OK));

    // Noise ahead of the marker is skipped.
    transport.set_responder(move |frame| {
        let mut bytes = vec![0x00, 0x13, 0x37];
        bytes.extend(
            ResponseFrame::new(
                frame.board_id,
                frame.addr,
                frame.command,
                StatusCode(STATUS_OK),
                vec![],
            )
            .ok()?
            .encode(&ProtocolConfig::default().constants),
        );
        Some(bytes)
    });
    assert_eq!(master.ping(1).unwrap(), StatusCode(STATUS_OK));
    assert_eq!(transport.frame_count(), 2);
}

#[test]
fn test_echo_mismatch_rejected() {
    let bus = SimBus::new().with_board(1, SimBoard::new());
    let (master, transport) = master(&bus);
    transport.set_responder(|frame| {
        ResponseFrame::new(
            frame.board_id,
            frame.addr,
            frame.command + 1,
            StatusCode(STATUS_OK),
            vec![],
        )
        .ok()
        .map(|r| r.encode(&ProtocolConfig::default().constants))
    });

    let err = master.ping(1).unwrap_err();
    assert!(matches!(
        err,
        MasterError::Protocol(ProtocolError::UnexpectedEcho { command: 4, expected_command: 3, .. })
    ));
}

#[test]
fn test_board_handle() {
    let bus = SimBus::new().with_board(7, SimBoard::new().with_sensor(0x40, SimSensor::ina219(2)));
    let (master, _) = master(&bus);
    let board = master.board(7);

    assert_eq!(board.ping().unwrap(), StatusCode(STATUS_OK));
    assert_eq!(board.list_sensors().unwrap().len(), 1);
    assert_eq!(
        board.get_config_field(0x40, "ina219", "period").unwrap(),
        FieldValue::Scalar(2)
    );
}

#[test]
fn test_concurrent_callers_never_interleave() {
    let bus = SimBus::new()
        .with_board(1, SimBoard::new().with_sensor(0x40, SimSensor::ina219(5)))
        .with_board(2, SimBoard::new().with_sensor(0x41, SimSensor::ina219(6)));
    let (master, _) = master(&bus);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let master = std::sync::Arc::clone(&master);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    if i % 2 == 0 {
                        assert_eq!(master.ping(1).unwrap(), StatusCode(STATUS_OK));
                    } else {
                        assert_eq!(master.list_sensors(2).unwrap(), vec![("ina219".to_string(), 0x41)]);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_runtime_settings() {
    let bus = SimBus::new().with_board(1, SimBoard::new());
    let (master, transport) = master(&bus);

    master.set_baud_rate(57_600).unwrap();
    master
        .set_timeout(std::time::Duration::from_millis(30))
        .unwrap();
    assert_eq!(transport.baud_rate(), 57_600);
    assert_eq!(master.settings().baud_rate, 57_600);

    master.set_port("/dev/ttyUSB1").unwrap();
    assert_eq!(master.settings().path, "/dev/ttyUSB1");
    assert_eq!(master.ping(1).unwrap(), StatusCode(STATUS_OK));
}
