//! Local playback of a grid sequence

use std::{fmt, time::Duration};

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::{
    link::LinkState,
    models::{BadgeTheme, Color, Grid},
};

lazy_static::lazy_static! {
    /// Shown instead of the content while the badge cannot receive it
    pub static ref DISCONNECTED: Grid = {
        const FACE: [&str; 10] = [
            "..........",
            "........b.",
            "........b.",
            "...w..w...",
            "..........",
            "..........",
            "...wwww...",
            "..w....w..",
            "..........",
            "..........",
        ];

        Grid::from_fn(|x, y| match FACE[y].as_bytes()[x] {
            b'w' => Color::new(255, 255, 255),
            b'b' => Color::new(68, 73, 247),
            _ => Color::new(0, 0, 0),
        })
    };
}

/// Grid to display for the current link state
pub fn frame_for(state: LinkState, content: &Grid) -> Grid {
    if state.is_current() {
        *content
    } else {
        *DISCONNECTED
    }
}

/// Playback clock advancing through a sequence at its frame rate
#[derive(Debug)]
pub struct Player {
    frame_count: usize,
    index: usize,
    interval: Interval,
}

impl Player {
    pub fn new(frame_count: usize, fps: u32) -> Self {
        let period = Duration::from_secs_f64(1. / fps.max(1) as f64);
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            frame_count: frame_count.max(1),
            index: 0,
            interval,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Rewind to the first frame and restart the clock
    pub fn reset(&mut self) {
        self.index = 0;
        self.interval.reset();
    }

    /// Wait for the next tick and return the new frame index
    pub async fn advance(&mut self) -> usize {
        self.interval.tick().await;
        self.index = (self.index + 1) % self.frame_count;
        self.index
    }
}

/// Truecolor terminal rendering of a grid inside a badge-colored frame
pub struct Ansi<'g> {
    pub grid: &'g Grid,
    pub theme: BadgeTheme,
}

impl<'g> Ansi<'g> {
    pub fn new(grid: &'g Grid, theme: BadgeTheme) -> Self {
        Self { grid, theme }
    }
}

fn write_color(f: &mut fmt::Formatter<'_>, color: Color, text: &str) -> fmt::Result {
    write!(
        f,
        "\x1B[38;2;{red};{green};{blue}m{text}",
        red = color.red,
        green = color.green,
        blue = color.blue,
        text = text,
    )
}

impl fmt::Display for Ansi<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shell = self.theme.shell_color();
        let edge = "██".repeat(self.grid.rows().count() + 2);

        write_color(f, shell, &edge)?;
        writeln!(f, "\x1B[0m")?;

        for row in self.grid.rows() {
            write_color(f, shell, "██")?;
            for cell in row.iter() {
                write_color(f, *cell, "██")?;
            }
            write_color(f, shell, "██")?;
            writeln!(f, "\x1B[0m")?;
        }

        write_color(f, shell, &edge)?;
        write!(f, "\x1B[0m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GRID_SIZE;

    #[test]
    fn placeholder_unless_current() {
        let content = Grid::filled(Color::new(1, 2, 3));

        assert_eq!(frame_for(LinkState::ConnectedCurrent, &content), content);
        assert_eq!(frame_for(LinkState::Disconnected, &content), *DISCONNECTED);
        assert_eq!(frame_for(LinkState::ConnectedLegacy, &content), *DISCONNECTED);
    }

    #[test]
    fn placeholder_has_a_face() {
        assert_eq!(DISCONNECTED.get(3, 3), Some(Color::new(255, 255, 255)));
        assert_eq!(DISCONNECTED.get(8, 1), Some(Color::new(68, 73, 247)));
        assert_eq!(DISCONNECTED.get(0, 0), Some(Color::new(0, 0, 0)));
    }

    #[test]
    fn ansi_output_shape() {
        let grid = Grid::filled(Color::new(10, 20, 30));
        let out = Ansi::new(&grid, BadgeTheme::Red).to_string();

        assert_eq!(out.lines().count(), GRID_SIZE + 2);
        assert_eq!(out.matches("\x1B[38;2;10;20;30m").count(), GRID_SIZE * GRID_SIZE);
        assert!(out.starts_with(&format!(
            "\x1B[38;2;{};{};{}m",
            BadgeTheme::Red.shell_color().red,
            BadgeTheme::Red.shell_color().green,
            BadgeTheme::Red.shell_color().blue
        )));
        assert!(out.ends_with("\x1B[0m"));
    }

    #[tokio::test(start_paused = true)]
    async fn player_ticks_at_frame_rate() {
        let mut player = Player::new(3, 15);
        let start = Instant::now();

        assert_eq!(player.index(), 0);
        assert_eq!(player.advance().await, 1);
        assert_eq!(player.advance().await, 2);
        assert_eq!(player.advance().await, 0);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(199) && elapsed <= Duration::from_millis(201));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rewinds() {
        let mut player = Player::new(5, 30);
        player.advance().await;
        player.advance().await;
        assert_eq!(player.index(), 2);

        player.reset();
        assert_eq!(player.index(), 0);
        assert_eq!(player.advance().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_frame_stays_put() {
        let mut player = Player::new(1, 1);
        assert_eq!(player.advance().await, 0);
        assert_eq!(player.advance().await, 0);
    }
}
