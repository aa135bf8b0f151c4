mod app;
mod camera;
mod renderer;
mod settings;
mod teleport;

fn main() {
    app::run();
}
