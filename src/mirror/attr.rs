use std::fmt;

use serde::{Deserialize, Serialize};

use crate::widget::WidgetId;

/// Externally visible widget attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Attribute {
    Text,
    ToolTipText,
    Bounds,
    Background,
    Foreground,
    Enabled,
    Visible,
    Style,
    Orientation,
    Selection,
    Maximum,
    Minimum,
    Children,
    Items,
    Image,
    BackgroundImage,
    Cursor,
    Font,
    Region,
    Menu,
}

impl Attribute {
    /// Key used on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ToolTipText => "toolTipText",
            Self::Bounds => "bounds",
            Self::Background => "background",
            Self::Foreground => "foreground",
            Self::Enabled => "enabled",
            Self::Visible => "visible",
            Self::Style => "style",
            Self::Orientation => "orientation",
            Self::Selection => "selection",
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
            Self::Children => "children",
            Self::Items => "items",
            Self::Image => "image",
            Self::BackgroundImage => "backgroundImage",
            Self::Cursor => "cursor",
            Self::Font => "font",
            Self::Region => "region",
            Self::Menu => "menu",
        }
    }

    /// Large opaque resources are kept locally and never serialized.
    pub fn is_mirrored(self) -> bool {
        !matches!(
            self,
            Self::Image
                | Self::BackgroundImage
                | Self::Cursor
                | Self::Font
                | Self::Region
                | Self::Menu
        )
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Rgba {
    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha: 255,
        }
    }
}

/// Handle to an out-of-band resource such as an image or font.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

/// Value held by a mirrored attribute. Widget references are held by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Bounds(Rect),
    Color(Rgba),
    Widget(Option<WidgetId>),
    Widgets(Vec<Option<WidgetId>>),
    Strings(Vec<String>),
    Resource(ResourceId),
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Rect> for AttrValue {
    fn from(value: Rect) -> Self {
        Self::Bounds(value)
    }
}

impl From<Rgba> for AttrValue {
    fn from(value: Rgba) -> Self {
        Self::Color(value)
    }
}
