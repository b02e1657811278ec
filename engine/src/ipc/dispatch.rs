//! IPC message dispatch: parse s-expressions and drive the registry.
//!
//! One message per call. A `frame` message yields zero or more event lines
//! (gestures, calibration progress, meter); every other message yields a
//! single response.

use anyhow::{anyhow, ensure, Context};
use lexpr::Value;
use tracing::{debug, warn};

use crate::gesture::hand::HandObservation;
use crate::gesture::pose::{FaceKeypoints, Landmark, Orientation, PoseSource};
use crate::gesture::registry::{CalibrationTarget, FaceObservation, Frame, SessionRegistry};

/// Parse an s-expression message and dispatch to the appropriate handler.
/// Returns the output lines (s-expressions) in order.
pub fn handle_message(registry: &mut SessionRegistry, raw: &str) -> Vec<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("malformed s-expression: {}", e);
            return vec![error_response(0, &format!("malformed s-expression: {e}"))];
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    match msg_type.as_deref() {
        Some("frame") => handle_frame(registry, msg_id, &value),
        Some("calibrate") => vec![handle_calibrate(registry, msg_id, &value)],
        Some("reset") => {
            registry.reset();
            vec![ok_response(msg_id)]
        }
        Some("status") => vec![format!(
            "(:type :response :id {} :status :ok :registry {})",
            msg_id,
            registry.status_sexp()
        )],
        Some("config") => vec![format!(
            "(:type :response :id {} :status :ok :config {})",
            msg_id,
            registry.config().config_sexp()
        )],
        Some("ping") => vec![format!(
            "(:type :response :id {} :status :ok :subjects {} :hands {})",
            msg_id,
            registry.subject_count(),
            registry.hand_count()
        )],
        Some(other) => {
            warn!("unknown message type: {}", other);
            vec![error_response(msg_id, &format!("unknown message type: {other}"))]
        }
        None => vec![error_response(msg_id, "missing :type")],
    }
}

// ── Handlers ───────────────────────────────────────────────

fn handle_frame(registry: &mut SessionRegistry, msg_id: i64, value: &Value) -> Vec<String> {
    let frame = match parse_frame(value) {
        Ok(f) => f,
        Err(e) => {
            warn!("rejected frame: {:#}", e);
            return vec![error_response(msg_id, &format!("{e:#}"))];
        }
    };

    let events = registry.update(&frame);
    let mut out: Vec<String> = events.iter().map(|e| e.to_sexp()).collect();
    out.extend(registry.calibration_reports().iter().map(|r| r.to_sexp()));
    out.push(format_event(
        "meter",
        &[
            ("value", &format!("{:.3}", registry.meter())),
            ("t", &format!("{:.0}", frame.timestamp_ms)),
        ],
    ));
    debug!(
        "frame t={:.0}: {} faces, {} hands, {} gestures",
        frame.timestamp_ms,
        frame.faces.len(),
        frame.hands.len(),
        events.len()
    );
    out
}

fn handle_calibrate(registry: &mut SessionRegistry, msg_id: i64, value: &Value) -> String {
    let target = match get_int(value, "subject") {
        Some(id) => match u32::try_from(id) {
            Ok(id) => CalibrationTarget::Subject(id),
            Err(_) => return error_response(msg_id, "invalid :subject"),
        },
        None => CalibrationTarget::All,
    };
    let baseline = match (get_float(value, "yaw"), get_float(value, "pitch")) {
        (Some(yaw), Some(pitch)) => Some(Orientation::new(yaw, pitch)),
        (None, None) => None,
        _ => {
            return error_response(msg_id, "explicit baseline needs both :yaw and :pitch");
        }
    };

    let affected = registry.calibrate(target, baseline);
    format!(
        "(:type :response :id {} :status :ok :affected {})",
        msg_id, affected
    )
}

// ── Frame parsing ──────────────────────────────────────────

fn parse_frame(value: &Value) -> anyhow::Result<Frame> {
    let timestamp_ms = get_float(value, "t").context("frame missing numeric :t")?;
    let faces: Vec<FaceObservation> = get_value(value, "faces")
        .map(|v| list_items(v).into_iter().map(parse_face).collect())
        .transpose()?
        .unwrap_or_default();
    let hands: Vec<HandObservation> = get_value(value, "hands")
        .map(|v| list_items(v).into_iter().map(parse_hand).collect())
        .transpose()?
        .unwrap_or_default();
    Ok(Frame {
        timestamp_ms,
        faces,
        hands,
    })
}

fn parse_id(value: &Value, what: &str) -> anyhow::Result<u32> {
    let id = get_int(value, "id").with_context(|| format!("{what} missing :id"))?;
    u32::try_from(id).map_err(|_| anyhow!("{what} :id {id} out of range"))
}

fn parse_face(value: &Value) -> anyhow::Result<FaceObservation> {
    let id = parse_id(value, "face")?;

    let pose = if let Some(kp) = get_value(value, "keypoints") {
        let points = parse_points(kp)?;
        ensure!(
            points.len() == 4,
            "face {id} :keypoints needs 4 points (left-jaw right-jaw forehead chin), got {}",
            points.len()
        );
        PoseSource::Keypoints(FaceKeypoints {
            left_jaw: points[0],
            right_jaw: points[1],
            forehead: points[2],
            chin: points[3],
        })
    } else if let Some(mesh) = get_value(value, "mesh") {
        let points = parse_points(mesh)?;
        PoseSource::Keypoints(FaceKeypoints::from_mesh(&points).with_context(|| format!("face {id}"))?)
    } else if let Some(m) = get_value(value, "matrix") {
        let nums = parse_numbers(m)?;
        let matrix: [f32; 16] = nums
            .iter()
            .map(|&n| n as f32)
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| anyhow!("face {id} :matrix needs 16 numbers, got {}", nums.len()))?;
        PoseSource::Matrix(matrix)
    } else {
        // Absent or non-numeric angles are missing data, held downstream.
        PoseSource::Angles {
            yaw: get_float(value, "yaw").unwrap_or(f64::NAN),
            pitch: get_float(value, "pitch").unwrap_or(f64::NAN),
        }
    };

    Ok(FaceObservation { id, pose })
}

fn parse_hand(value: &Value) -> anyhow::Result<HandObservation> {
    let id = parse_id(value, "hand")?;
    if let Some(lms) = get_value(value, "landmarks") {
        let points = parse_points(lms)?;
        return HandObservation::from_landmarks(id, &points);
    }
    let thumb = get_value(value, "thumb").with_context(|| format!("hand {id} missing :thumb"))?;
    let index = get_value(value, "index").with_context(|| format!("hand {id} missing :index"))?;
    Ok(HandObservation::new(id, parse_point(thumb)?, parse_point(index)?))
}

fn parse_points(value: &Value) -> anyhow::Result<Vec<Landmark>> {
    list_items(value).into_iter().map(parse_point).collect()
}

/// `(x y)` or `(x y visibility)`.
fn parse_point(value: &Value) -> anyhow::Result<Landmark> {
    let nums = parse_numbers(value)?;
    match nums.as_slice() {
        [x, y] => Ok(Landmark::new(*x as f32, *y as f32)),
        [x, y, vis] => Ok(Landmark::new(*x as f32, *y as f32).with_visibility(*vis as f32)),
        _ => Err(anyhow!("point needs 2 or 3 numbers, got {}", nums.len())),
    }
}

fn parse_numbers(value: &Value) -> anyhow::Result<Vec<f64>> {
    list_items(value)
        .into_iter()
        .map(|v| match v {
            Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("number out of range: {n}")),
            other => Err(anyhow!("expected a number, got {other}")),
        })
        .collect()
}

// ── Helpers ────────────────────────────────────────────────

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

/// Escape a string for s-expression output.
fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Find the value following `:key` in an s-expression plist.
/// Handles both `Value::Keyword("key")` (elisp parser) and
/// `Value::Symbol(":key")` (default parser) forms.
fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Extract a keyword value from an s-expression plist as a string.
fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let val = get_value(value, key)?;
    Some(match val {
        Value::Keyword(v) => v.to_string(),
        Value::Symbol(v) => {
            let s = v.to_string();
            s.strip_prefix(':').unwrap_or(&s).to_string()
        }
        Value::String(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => (if *b { "t" } else { "nil" }).to_string(),
        Value::Null => "nil".to_string(),
        _ => val.to_string(),
    })
}

/// Extract an integer value from an s-expression plist.
fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a floating-point value from an s-expression plist.
fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Elements of a proper list, in order.
fn list_items(value: &Value) -> Vec<&Value> {
    let mut items = Vec::new();
    let mut current = value;
    while let Value::Cons(pair) = current {
        items.push(pair.car());
        current = pair.cdr();
    }
    items
}

/// Format an IPC event s-expression.
pub fn format_event(event_type: &str, fields: &[(&str, &str)]) -> String {
    let mut s = format!("(:type :event :event :{}", event_type);
    for (key, val) in fields {
        s.push_str(&format!(" :{} {}", key, val));
    }
    s.push(')');
    s
}
