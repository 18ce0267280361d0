mod close;
mod markers;
mod migrations;
