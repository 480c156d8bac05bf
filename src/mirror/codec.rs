use serde_json::{json, Map, Value};

use super::attr::{AttrValue, Attribute};

/// Turns mirrored attribute values into wire values.
pub trait AttributeCodec {
    /// `None` leaves the attribute out of the message.
    fn encode(&self, attr: Attribute, value: &AttrValue) -> Option<Value>;

    fn encode_delta(&self, delta: &[(Attribute, AttrValue)]) -> Map<String, Value> {
        delta
            .iter()
            .filter_map(|(attr, value)| {
                self.encode(*attr, value)
                    .map(|encoded| (attr.name().to_string(), encoded))
            })
            .collect()
    }
}

/// Default JSON encoding. Widget references become identities and null
/// collection entries are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl AttributeCodec for JsonCodec {
    fn encode(&self, attr: Attribute, value: &AttrValue) -> Option<Value> {
        if !attr.is_mirrored() {
            return None;
        }

        let encoded = match value {
            AttrValue::Bool(value) => json!(value),
            AttrValue::Int(value) => json!(value),
            AttrValue::Text(value) => json!(value),
            AttrValue::Bounds(rect) => json!({
                "x": rect.x,
                "y": rect.y,
                "width": rect.width,
                "height": rect.height,
            }),
            AttrValue::Color(color) => json!({
                "red": color.red,
                "green": color.green,
                "blue": color.blue,
                "alpha": color.alpha,
            }),
            AttrValue::Widget(widget) => json!(widget.map(|id| id.get())),
            AttrValue::Widgets(widgets) => Value::Array(
                widgets
                    .iter()
                    .flatten()
                    .map(|id| json!(id.get()))
                    .collect(),
            ),
            AttrValue::Strings(values) => json!(values),
            AttrValue::Resource(_) => return None,
        };
        Some(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{Rect, ResourceId};
    use crate::widget::WidgetId;

    #[test]
    fn child_sequences_skip_null_slots() {
        let children = AttrValue::Widgets(vec![
            Some(WidgetId::new(2)),
            None,
            Some(WidgetId::new(5)),
        ]);
        assert_eq!(
            JsonCodec.encode(Attribute::Children, &children),
            Some(json!([2, 5]))
        );
    }

    #[test]
    fn delta_uses_wire_names_and_skips_resources() {
        let delta = vec![
            (Attribute::ToolTipText, AttrValue::Text("tip".into())),
            (Attribute::Bounds, AttrValue::Bounds(Rect::new(1, 2, 3, 4))),
            (Attribute::Style, AttrValue::Resource(ResourceId(9))),
            (Attribute::Font, AttrValue::Resource(ResourceId(1))),
        ];
        let encoded = JsonCodec.encode_delta(&delta);
        assert_eq!(
            Value::Object(encoded),
            json!({
                "toolTipText": "tip",
                "bounds": {"x": 1, "y": 2, "width": 3, "height": 4},
            })
        );
    }
}
