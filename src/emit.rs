//! Mapping from collector records to accumulator tags and fields.

use crate::collectors::w3wp::AppPoolMetric;
use crate::collectors::win_services::ServiceRecord;
use crate::metric::{Accumulator, FieldValue, Fields, Tags};

pub const SERVICES_MEASUREMENT: &str = "win_services";
pub const W3WP_MEASUREMENT: &str = "w3wp";

pub fn emit_service(acc: &mut dyn Accumulator, record: &ServiceRecord) {
    let mut tags = Tags::from([("service_name".to_string(), record.name.clone())]);
    // A service may legitimately have no display name.
    if !record.display_name.is_empty() {
        tags.insert("display_name".to_string(), record.display_name.clone());
    }
    let fields = Fields::from([
        ("state".to_string(), FieldValue::Int(i64::from(record.state))),
        ("startup_mode".to_string(), FieldValue::Int(i64::from(record.startup_mode))),
    ]);
    acc.add_fields(SERVICES_MEASUREMENT, fields, tags);
}

pub fn emit_app_pool(acc: &mut dyn Accumulator, app_pool: &str, metric: &AppPoolMetric) {
    let tags = Tags::from([("appPool".to_string(), app_pool.to_string())]);
    let fields = Fields::from([
        ("Processor_Time".to_string(), FieldValue::from(metric.percent_processor_time)),
        ("Private_Bytes".to_string(), FieldValue::from(metric.private_bytes)),
        ("Working_Set".to_string(), FieldValue::from(metric.working_set)),
        ("Handle_Count".to_string(), FieldValue::from(metric.handle_count)),
        ("Thread_Count".to_string(), FieldValue::from(metric.thread_count)),
        ("IO_Read".to_string(), FieldValue::from(metric.io_read_bytes_per_sec)),
        ("IO_Write".to_string(), FieldValue::from(metric.io_write_bytes_per_sec)),
    ]);
    acc.add_fields(W3WP_MEASUREMENT, fields, tags);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricBuffer;

    #[test]
    fn test_service_display_name_omitted_when_empty() {
        let mut buffer = MetricBuffer::new();
        let record = ServiceRecord {
            name: "wuauserv".to_string(),
            display_name: String::new(),
            state: 1,
            startup_mode: 3,
        };
        emit_service(&mut buffer, &record);

        let metric = &buffer.metrics()[0];
        assert_eq!(metric.measurement, "win_services");
        assert_eq!(metric.tag("service_name"), Some("wuauserv"));
        assert!(!metric.tags.contains_key("display_name"));
        assert_eq!(metric.field("state"), Some(FieldValue::Int(1)));
        assert_eq!(metric.field("startup_mode"), Some(FieldValue::Int(3)));
    }

    #[test]
    fn test_service_display_name_tagged() {
        let mut buffer = MetricBuffer::new();
        let record = ServiceRecord {
            name: "Spooler".to_string(),
            display_name: "Print Spooler".to_string(),
            state: 4,
            startup_mode: 2,
        };
        emit_service(&mut buffer, &record);
        assert_eq!(buffer.metrics()[0].tag("display_name"), Some("Print Spooler"));
    }

    #[test]
    fn test_app_pool_fields() {
        let mut buffer = MetricBuffer::new();
        let metric = AppPoolMetric {
            percent_processor_time: 50.0,
            private_bytes: 1000,
            working_set: 2000,
            handle_count: 10,
            thread_count: 20,
            io_read_bytes_per_sec: 3000,
            io_write_bytes_per_sec: 4000,
        };
        emit_app_pool(&mut buffer, "Pool1", &metric);

        let emitted = &buffer.metrics()[0];
        assert_eq!(emitted.measurement, "w3wp");
        assert_eq!(emitted.tag("appPool"), Some("Pool1"));
        assert_eq!(emitted.fields.len(), 7);
        assert_eq!(emitted.field("Processor_Time"), Some(FieldValue::Float(50.0)));
        assert_eq!(emitted.field("Handle_Count"), Some(FieldValue::UInt(10)));
        assert_eq!(emitted.field("IO_Write"), Some(FieldValue::UInt(4000)));
    }
}
