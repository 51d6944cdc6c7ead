use teloxide::types::{ButtonRequest, KeyboardButton, KeyboardMarkup};

/// Reply keyboard buttons of the main menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Menu {
  Stats,
  Link,
  History,
  Tour,
}

impl Menu {
  const ALL: [Menu; 4] = [Menu::Stats, Menu::Link, Menu::History, Menu::Tour];

  pub fn label(self) -> &'static str {
    match self {
      Menu::Stats => "📊 My stats",
      Menu::Link => "🔗 My link",
      Menu::History => "📜 History",
      Menu::Tour => "🧳 Request a tour",
    }
  }

  pub fn from_label(text: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|item| item.label() == text)
  }
}

pub fn main() -> KeyboardMarkup {
  let button = |item: Menu| KeyboardButton::new(item.label());
  KeyboardMarkup::new(vec![
    vec![button(Menu::Stats), button(Menu::Link)],
    vec![button(Menu::History), button(Menu::Tour)],
  ])
  .resize_keyboard()
}

pub fn contact() -> KeyboardMarkup {
  KeyboardMarkup::new(vec![vec![
    KeyboardButton::new("📱 Share phone number")
      .request(ButtonRequest::Contact),
  ]])
  .resize_keyboard()
  .one_time_keyboard()
}
