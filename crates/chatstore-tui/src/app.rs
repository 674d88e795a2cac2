use chatstore_core::session::{self, ChatSession};
use chatstore_core::{ChatRole, ChatStore, Notification, StoreRegistry};
use tokio::task::JoinHandle;

pub struct App {
    pub should_quit: bool,

    // Shared state
    pub registry: StoreRegistry,
    pub store: ChatStore,
    pub session: ChatSession,

    // Input box
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Chat view
    pub scroll: u16,
    pub follow: bool, // keep the newest line in view
    pub chat_height: u16,
    pub chat_width: u16,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    pub query_task: Option<JoinHandle<anyhow::Result<String>>>,
    pub last_version: u64,
}

impl App {
    pub fn new(registry: StoreRegistry, session: ChatSession) -> Self {
        let store = registry.use_store::<ChatStore>();

        Self {
            should_quit: false,
            registry,
            store,
            session,
            input: String::new(),
            cursor: 0,
            scroll: 0,
            follow: true,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            query_task: None,
            last_version: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.query_task.is_some() || session::is_busy(&self.store)
    }

    /// Send the input box contents to the model in the background
    pub fn submit(&mut self) {
        let question = self.input.trim().to_string();
        if question.is_empty() || self.is_busy() {
            return;
        }

        self.input.clear();
        self.cursor = 0;
        self.follow = true;

        let session = self.session.clone();
        self.query_task = Some(tokio::spawn(async move { session.ask(&question).await }));
    }

    pub fn on_store_change(&mut self, note: Notification) {
        match note {
            Notification::Changed(event) => {
                self.last_version = event.version;
            }
            Notification::Lagged(n) => {
                tracing::debug!(skipped = n, "redraw fell behind store writes");
                self.last_version = self.store.version();
            }
        }
        self.reap_query_task();
    }

    /// Drop the handle once the background ask has completed. The session
    /// has already written its outcome into the store.
    pub fn reap_query_task(&mut self) {
        if self.query_task.as_ref().is_some_and(|task| task.is_finished()) {
            self.query_task = None;
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.store.waiting() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        self.reap_query_task();
    }

    /// Forget the conversation
    pub fn clear_chat(&mut self) {
        if self.is_busy() {
            return;
        }
        self.store.clear_data();
        self.store.set_answer(String::new());
        self.scroll = 0;
        self.follow = true;
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_scroll();
        self.scroll = (self.scroll + lines).min(max);
        self.follow = self.scroll >= max;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
        self.follow = true;
    }

    pub fn max_scroll(&self) -> u16 {
        self.chat_line_count().saturating_sub(self.chat_height)
    }

    /// Estimated rendered height of the transcript plus any live answer
    pub fn chat_line_count(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let state = self.store.snapshot();
        let mut total_lines: usize = 0;

        for msg in &state.data {
            total_lines += 1; // Role line ("You:" or "AI:")
            total_lines += wrapped_lines(&msg.content, wrap_width);
            total_lines += 1; // blank separator
        }

        if state.streamdiv || state.waiting {
            total_lines += 1; // "AI:"
            if state.waiting && state.answer.is_empty() {
                total_lines += 1; // "Thinking..."
            } else {
                total_lines += wrapped_lines(&state.answer, wrap_width) + 1; // answer and cursor
            }
        }

        total_lines.min(u16::MAX as usize) as u16
    }

    pub fn message_count(&self, role: ChatRole) -> usize {
        self.store
            .with_data(|data| data.iter().filter(|m| m.role == role).count())
    }
}

fn wrapped_lines(text: &str, wrap_width: usize) -> usize {
    text.lines()
        .map(|line| {
            // Use character count, not byte length, for proper UTF-8 handling
            let char_count = line.chars().count();
            if char_count == 0 {
                1 // Empty line still takes one line
            } else {
                char_count.div_ceil(wrap_width)
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatstore_core::{ChatMessage, OllamaClient};

    fn test_app() -> App {
        let registry = StoreRegistry::new();
        let store = registry.use_store::<ChatStore>();
        let session = ChatSession::new(store, OllamaClient::new("http://127.0.0.1:9"), "m");
        App::new(registry, session)
    }

    #[test]
    fn test_app_shares_registry_store() {
        let app = test_app();
        let again = app.registry.use_store::<ChatStore>();
        assert!(ChatStore::same_instance(&app.store, &again));
        assert!(ChatStore::same_instance(&app.store, app.session.store()));
    }

    #[test]
    fn test_wrapped_lines() {
        assert_eq!(wrapped_lines("", 10), 0);
        assert_eq!(wrapped_lines("abc", 10), 1);
        assert_eq!(wrapped_lines("abcdefghij", 10), 1);
        assert_eq!(wrapped_lines("abcdefghijk", 10), 2);
        assert_eq!(wrapped_lines("a\n\nb", 10), 3);
    }

    #[test]
    fn test_line_count_includes_live_answer() {
        let mut app = test_app();
        app.chat_width = 20;
        app.store.push_data(ChatMessage::user("hi"));
        assert_eq!(app.chat_line_count(), 3);

        app.store.set_streamdiv(true);
        assert_eq!(app.chat_line_count(), 5);

        app.store.set_answer("line one\nline two");
        assert_eq!(app.chat_line_count(), 7);

        app.store.set_answer(String::new());
        app.store.set_waiting(true);
        assert_eq!(app.chat_line_count(), 5);
    }

    #[test]
    fn test_scrolling_tracks_follow() {
        let mut app = test_app();
        app.chat_width = 20;
        app.chat_height = 2;
        for i in 0..5 {
            app.store.push_data(ChatMessage::user(format!("message {i}")));
        }
        // 5 messages * 3 lines, minus the visible 2
        assert_eq!(app.max_scroll(), 13);

        app.scroll_to_bottom();
        app.scroll_up(3);
        assert_eq!(app.scroll, 10);
        assert!(!app.follow);

        app.scroll_down(100);
        assert_eq!(app.scroll, 13);
        assert!(app.follow);
    }

    #[tokio::test]
    async fn test_submit_ignores_blank_input() {
        let mut app = test_app();
        app.input = "   ".to_string();
        app.submit();
        assert!(app.query_task.is_none());
        assert_eq!(app.store.version(), 0);
    }

    #[test]
    fn test_clear_chat_refused_while_busy() {
        let mut app = test_app();
        session::begin(&app.store, "q");
        app.clear_chat();
        assert_eq!(app.store.data().len(), 1);

        session::finish(&app.store);
        app.clear_chat();
        assert!(app.store.data().is_empty());
        assert_eq!(app.store.answer(), "");
    }
}
